pub mod collector;
pub mod parser;

pub use collector::TracerCollector;
pub use parser::{parse_tracer_result, EntityAddresses, ParsedTrace};
