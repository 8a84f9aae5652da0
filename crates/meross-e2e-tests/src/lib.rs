//! Shared test harness for end-to-end scenarios spanning
//! `meross-protocol`, `meross-mqtt` and `meross-manager`.
