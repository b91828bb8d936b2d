// Copyright 2025 Pixelport (https://github.com/pixelport)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use clap::Parser;
use pixelport_server::{config::ServerConfig, run_server};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config file)
    #[arg(long, env = "PIXELPORT_HTTP_ADDR")]
    http_addr: Option<String>,

    /// SQLite database path (overrides config file)
    #[arg(long, env = "PIXELPORT_DATABASE")]
    database: Option<String>,

    /// Start in maintenance mode
    #[arg(long, env = "PIXELPORT_MAINTENANCE")]
    maintenance: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load(args.config)?;
    if let Some(addr) = args.http_addr {
        config.server.listen_addr = addr;
    }
    if let Some(database) = args.database {
        config.store.database = database;
    }
    if args.maintenance {
        config.server.maintenance = true;
    }

    run_server(config).await
}
