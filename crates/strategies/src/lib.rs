mod submission_loop;

pub use submission_loop::{
    LoopReport, StopHandle, StopReason, SubmissionLoop, SubmissionLoopConfig, Trigger,
};
