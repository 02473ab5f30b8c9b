pub mod planner;
pub mod prompt;

pub use planner::LlmPlanner;
