use clap::Parser as _;
use env_logger::Env;

use metaapi_launcher::cli::{run, Cli};
use metaapi_launcher::ErrorKind;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let json = cli.json;
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            if json {
                match serde_json::to_string_pretty(&e) {
                    Ok(body) => eprintln!("{}", body),
                    Err(_) => eprintln!("Error: {}", e),
                }
            } else {
                eprintln!("Error: {}", e);
                if e.kind() == ErrorKind::StartupTimeout {
                    eprintln!(
                        "The server process was left running and may become healthy later; check with 'status'."
                    );
                }
            }
            e.kind().code() as i32
        }
    };
    std::process::exit(code);
}
