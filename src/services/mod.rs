pub mod action_service;
pub mod death_pipeline;
pub mod event_bus;
pub mod night_resolver;
pub mod phase_service;
pub mod role_service;
pub mod room_events;
pub mod room_service;
pub mod snapshot;
pub mod storage_supervisor;
pub mod timer_service;
pub mod vote_service;
pub mod websocket_service;
pub mod win_evaluator;
