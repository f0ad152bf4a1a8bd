use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use getopts::Options;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use dnsstats::stats::{DiskConfig, StatsConfig, StatsContext};
use dnsstats::web::server::WebServer;
use dnsstats::web::RouteRegistrar;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

/// Main entry point for the statistics server
fn main() {
    if let Err(e) = SimpleLogger::new().with_level(LevelFilter::Info).env().init() {
        eprintln!("Failed to initialize logger: {}", e);
    }

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "c",
        "config",
        "YAML file holding the statistics interval (default dnsstats.yaml)",
        "PATH",
    );
    opts.optopt(
        "d",
        "db",
        "File the statistics window is persisted to (default stats.json)",
        "PATH",
    );
    opts.optopt("p", "port", "Port of the HTTP control API (default 3000)", "PORT");

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            log::error!("{}", f);
            print_usage(&program, opts);
            std::process::exit(2);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let config_path = PathBuf::from(
        opt_matches
            .opt_str("c")
            .unwrap_or_else(|| "dnsstats.yaml".to_string()),
    );
    let db_path = PathBuf::from(
        opt_matches
            .opt_str("d")
            .unwrap_or_else(|| "stats.json".to_string()),
    );
    let port = match opt_matches.opt_str("p").map(|x| x.parse::<u16>()) {
        None => 3000,
        Some(Ok(port)) => port,
        Some(Err(e)) => {
            log::error!("Invalid port: {}", e);
            std::process::exit(2);
        }
    };

    let disk_config = match DiskConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to read {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    let webserver = Arc::new(WebServer::new());
    let persist_path = config_path.clone();

    let context = StatsContext::new(StatsConfig {
        filename: Some(db_path),
        limit_days: disk_config.statistics_interval,
        config_modified: Some(Box::new(move |config: &DiskConfig| {
            if let Err(e) = config.save(&persist_path) {
                log::error!("Failed to write {}: {}", persist_path.display(), e);
            }
        })),
        http_register: Some(webserver.clone() as Arc<dyn RouteRegistrar>),
        ..StatsConfig::default()
    });

    let context = match context {
        Ok(context) => context,
        Err(e) => {
            log::error!("Failed to start statistics: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = context.write_disk_config(&config_path) {
        log::warn!("Failed to write {}: {}", config_path.display(), e);
    }

    webserver.run_webserver(port);

    if let Err(e) = context.close() {
        log::error!("Failed to close statistics: {}", e);
    }
}
