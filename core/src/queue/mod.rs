mod journal;
pub mod mutation_queue;
pub mod record;

pub use mutation_queue::{slot_path, EnqueueOutcome, LocalMutationQueue, MAX_QUEUE_SLOTS};
pub use record::{MutationRecord, Operation};
