pub mod admin;
pub mod auth;
pub mod csv_io;
pub mod db;
pub mod entries;
pub mod localtime;
pub mod routes;
pub mod stats;
