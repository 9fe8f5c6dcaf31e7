//! System tests for the `yosun` crate. Everything lives under `tests/`.
//!
//! Tests marked `#[ignore]` need a RabbitMQ broker on `localhost` (port taken
//! from `RABBITMQ_PORT`, default `5672`, user and password `admin`). Run them
//! with `cargo test -p test-yosun -- --ignored`.
