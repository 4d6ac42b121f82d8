pub mod helpers;

mod controller;
mod shutdown;
