mod common;
mod flows;
