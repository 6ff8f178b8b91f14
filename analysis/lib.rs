#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod classify;
pub mod config;
pub mod data;
pub mod maxfilter;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod roc;
pub mod scale;
pub mod split;
