#![allow(dead_code)]

pub mod fixture;

pub use fixture::{drain, RaceFixture, RaceFixtureBuilder};
