//! Router-level tests for the gateway.

mod gateway_test;
