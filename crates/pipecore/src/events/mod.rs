mod bus;

pub use bus::{EventBus, EventEmitter, PipelineEvent, StageEvent, WorkerId};
