pub mod geolocation;
pub mod wake_lock;
