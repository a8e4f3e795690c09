pub mod dashboard;
pub mod db;
pub mod pipeline;
pub mod poller;
pub mod settings;
