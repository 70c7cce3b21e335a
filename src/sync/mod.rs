pub use event::{CompletionEvent, WaitOutcome};

mod event;
