pub mod attachment;
pub mod embedded_messages;
pub mod event_handlers;
pub mod playback_guard;
pub mod playback_manager;
pub mod playfile_error;
pub mod sinks;
pub mod staging;
pub mod voice_transport;
