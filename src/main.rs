// src/main.rs

use velodag::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("velodag error: {err:?}");
        std::process::exit(1);
    }

    match run(args).await {
        Ok(report) if report.is_success() => {}
        Ok(_) => std::process::exit(1),
        Err(err) => {
            eprintln!("velodag error: {err:?}");
            std::process::exit(1);
        }
    }
}
