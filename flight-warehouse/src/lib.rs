pub mod config;
pub mod dedupe;
pub mod detect;
pub mod dimension;
pub mod error;
pub mod fact;
pub mod metrics_consts;
pub mod raw;
pub mod recorder;
pub mod resolve;
pub mod run;
pub mod source;
pub mod store;
pub mod types;
