pub mod monitor;

pub use monitor::MonitorService;
