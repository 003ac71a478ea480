//! Demo client sending a single request

use clap::Parser;
use std::path::PathBuf;
use unixhttp::http::{Client, HttpRequest};

#[derive(Parser)]
#[command(name = "unixhttp-client")]
#[command(about = "Send one HTTP/1.1 request over a Unix domain socket", long_about = None)]
struct Cli {
    /// Path of the server socket
    socket: PathBuf,

    /// Request method, sent as given
    method: String,

    /// Request resource, path with optional query
    resource: String,

    /// Header name and value pairs, optionally followed by the content
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    rest: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut cli = Cli::parse();

    // An odd trailing argument is the content
    let content = if cli.rest.len() % 2 == 1 {
        cli.rest.pop()
    } else {
        None
    };

    let mut builder = HttpRequest::builder()
        .method(cli.method)
        .resource(cli.resource);
    for pair in cli.rest.chunks_exact(2) {
        builder = builder.header(&pair[0], &pair[1]);
    }
    if let Some(content) = content {
        builder = builder.content(content);
    }

    let response = Client::new(&cli.socket).send(&builder.build())?;

    println!("HTTP/1.1 {}", response.status());
    if let Some(content) = response.content() {
        println!("{}", String::from_utf8_lossy(content));
    }

    Ok(())
}
