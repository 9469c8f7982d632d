pub mod dispatcher;
pub mod evaluators;
pub mod extractor;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod repos;
pub mod runner;

pub use dispatcher::AlertDispatcher;
pub use evaluators::Evaluator;
pub use ingest::EventIngestor;
pub use model::{Alert, AlertRuleType, DeliveryStatus, Event};
pub use pipeline::RulesPipeline;
pub use runner::RulesEngineRunner;
