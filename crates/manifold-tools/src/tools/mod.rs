pub mod calculator;
pub mod weather;
pub mod web_search;
