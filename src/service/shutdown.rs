// Copyright 2026 framewire contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use crate::sync::CompletionEvent;

/// Engine-wide stop signal: a latched [`CompletionEvent`] shared by every
/// task of one server or client.
///
/// The same completion primitive that notifies I/O operations doubles as
/// the stop flag. `trigger` sets the latch once, and every blocking loop
/// selects `wait` alongside its work source. The latch also covers tasks
/// that start listening after the trigger, so a worker spawned mid-stop
/// still winds down instead of waiting for work that will never come.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    signal: Arc<CompletionEvent>,
}

impl Shutdown {
    pub fn new() -> Shutdown {
        Shutdown {
            signal: Arc::new(CompletionEvent::new()),
        }
    }

    /// Fires the stop signal. Idempotent.
    pub fn trigger(&self) {
        self.signal.set();
    }

    pub fn is_triggered(&self) -> bool {
        self.signal.is_set()
    }

    /// Resolves once the stop signal has fired, immediately when it already
    /// has.
    pub async fn wait(&self) {
        self.signal.wait(None).await;
    }

    /// Rearms the signal so a facade can reconnect after a stop.
    pub(crate) fn rearm(&self) {
        self.signal.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::Shutdown;

    #[tokio::test]
    async fn trigger_wakes_a_parked_waiter() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        tokio::task::yield_now().await;
        shutdown.trigger();
        waiter.await.unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn late_listeners_observe_the_latch() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        // cloned and waited on only after the trigger
        let late = shutdown.clone();
        late.wait().await;
        assert!(late.is_triggered());
    }

    #[tokio::test]
    async fn rearm_clears_the_latch() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.rearm();
        assert!(!shutdown.is_triggered());
    }
}
