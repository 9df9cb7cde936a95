use anyhow::Result;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "scout_rpc_requests_total",
        "Number of ledger RPC requests made."
    );
    describe_counter!(
        "scout_rpc_errors_total",
        "Number of ledger RPC failures by kind."
    );
    describe_histogram!(
        "scout_rpc_latency_ms",
        "Ledger RPC latency in milliseconds."
    );
    describe_counter!(
        "scout_gateway_chunks_total",
        "Gateway scan chunks by outcome (ok/shrink/skip)."
    );
    describe_counter!(
        "scout_classified_total",
        "Classification outcomes by stage and status."
    );
    describe_counter!(
        "scout_addresses_scored_total",
        "Addresses run through round reconstruction and scoring."
    );
}

pub fn install_prometheus(port: u16) -> Result<PrometheusHandle> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    Ok(PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()?)
}
