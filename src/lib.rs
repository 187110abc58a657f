pub mod answer_generator;
pub mod api;
pub mod citations;
pub mod config;
pub mod data_models;
pub mod display;
pub mod orchestrator;
pub mod search_client;
pub mod stream_decoder;
