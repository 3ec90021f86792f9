// SQLite archive of finished graphs

pub mod db;
pub mod schema;

pub use db::Archive;
