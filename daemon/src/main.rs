//! Process entry point: parse configuration, run migrations, wire the
//! composition root, spawn the background reconciliation jobs, and serve
//! the HTTP API — following the teacher's `HttpServer::new(move || ...)
//! .disable_signals().bind(..)?` bootstrap shape.

mod config;
mod context;
mod http;
mod jobs;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use config::Config;
use context::AppContext;
use jobs::InvoiceJobs;
use log::info;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    purser_common::logging::init(config.log_level);
    AppContext::require_supplier_details(&config)?;

    let ctx = Arc::new(AppContext::bootstrap(&config).await?);

    if let Some(monitor) = ctx.crypto_monitor.clone() {
        tokio::spawn(async move { monitor.run().await });
    }
    if let Some(reconciler) = ctx.x402_reconciler.clone() {
        tokio::spawn(async move { reconciler.run().await });
    }
    let invoice_jobs = Arc::new(InvoiceJobs::new(ctx.invoice_generator.clone(), config.invoice_job_interval_secs));
    {
        let invoice_jobs = invoice_jobs.clone();
        tokio::spawn(async move { invoice_jobs.run().await });
    }

    info!("starting HTTP API on {}", config.bind_address);
    let ctx_for_server = ctx.clone();
    let builder = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(ctx_for_server.clone()))
            .app_data(web::JsonConfig::default().limit(1024 * 1024))
            .configure(http::configure)
    })
    .disable_signals()
    .bind(&config.bind_address)?;

    let server = if config.http_workers > 0 { builder.workers(config.http_workers) } else { builder }.run();
    let handle = server.handle();

    let server_task = tokio::spawn(server);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping gracefully");
    invoice_jobs.stop();
    if let Some(monitor) = ctx.crypto_monitor.as_ref() {
        monitor.stop();
    }
    if let Some(reconciler) = ctx.x402_reconciler.as_ref() {
        reconciler.stop();
    }
    handle.stop(true).await;
    server_task.await??;

    Ok(())
}
