//! Demo server answering with a JSON echo of each request

use clap::Parser;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::mpsc;
use unixhttp::http::{HandlerResult, HttpRequest, HttpResponse, Router, Server, Status};

#[derive(Parser)]
#[command(name = "unixhttp-server")]
#[command(about = "HTTP/1.1 echo server on a Unix domain socket", long_about = None)]
struct Cli {
    /// Path of the socket to create; it must not exist yet
    socket: PathBuf,
}

fn echo(endpoint: &'static str) -> impl Fn(&HttpRequest) -> HandlerResult + Send + Sync {
    move |request| {
        let headers: Map<String, Value> = request
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), Value::from(value)))
            .collect();
        let args: Map<String, Value> = request
            .args()
            .iter()
            .map(|(name, value)| (name.to_string(), Value::from(value)))
            .collect();
        let content = String::from_utf8_lossy(request.content().unwrap_or_default());

        let body = json!({
            "endpoint": endpoint,
            "request": {
                "method": request.method(),
                "resource": request.path(),
                "headers": headers,
                "args": args,
                "content": content,
            }
        });

        Ok(HttpResponse::builder()
            .header("Content-Type", "application/json")
            .content(body.to_string())
            .build())
    }
}

fn fail(_request: &HttpRequest) -> HandlerResult {
    Ok(HttpResponse::new(Status::INTERNAL_SERVER_ERROR))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let router = Router::new()
        .endpoint(&["GET", "POST", "PUT", "DELETE"], "/", echo("/"))
        .route("GET", "/get", echo("/get"))
        .route("POST", "/post", echo("/post"))
        .route("GET", "/error/500", fail)
        .route(
            "GET",
            "/different_handlers_for_different_methods",
            echo("/different_handlers_for_different_methods"),
        )
        .route("POST", "/different_handlers_for_different_methods", fail);

    let handle = Server::bind(&cli.socket, router)?.spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    rx.recv()?;

    log::info!("Shutting down");
    handle.terminate();
    handle.wait_until_done()?;

    Ok(())
}
