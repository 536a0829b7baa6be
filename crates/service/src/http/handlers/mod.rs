pub mod files;
mod not_found;

pub use not_found::not_found_handler;
