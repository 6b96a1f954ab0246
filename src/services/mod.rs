pub mod job_scheduler_service;
pub mod slot_manager;
pub mod status_broadcaster;
pub mod stop_controller;
pub mod task_registry;
pub mod task_runner;
