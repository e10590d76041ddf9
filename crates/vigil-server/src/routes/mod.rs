pub mod cron;
pub mod gate;
