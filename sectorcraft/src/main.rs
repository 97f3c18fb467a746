mod inventories;
mod properties;

use std::error::Error;
use std::fs;
use std::io::{self, BufRead};
use std::result::Result;
use std::sync::Arc;
use std::thread;

use log::*;
use sectorcraft_core::blocks::BlockRegistry;
use sectorcraft_core::server::*;
use sectorcraft_core::terrain::SimpleTerrainGenerator;

use crate::inventories::JsonInventoryStore;
use crate::properties::ServerProperties;

const PROPERTIES_FILENAME: &str = "server.properties";
const PLAYERS_FILENAME: &str = "players.json";
const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = "Commands:
  say <message>  broadcast a message
  save           save the world and inventories
  stop           save and shut the server down
  help           show this message";

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    info!("Starting sectorcraft version {}", VERSION);
    let properties: ServerProperties = match fs::read_to_string(PROPERTIES_FILENAME) {
        Ok(s) => s.parse()?,
        Err(e) => {
            warn!("Error opening properties file '{}': {}, using defaults", PROPERTIES_FILENAME, e);
            ServerProperties::default()
        }
    };

    let address = properties.address();
    let config = ServerConfig::from(properties);
    let terrain = SimpleTerrainGenerator::new(config.seed);
    let inventories = JsonInventoryStore::open(PLAYERS_FILENAME)?;

    let server = Server::new(
        config,
        Arc::new(BlockRegistry::default()),
        Box::new(terrain),
        Box::new(inventories));
    server.load_world()?;

    let server_ref = Arc::new(server);
    let listener = Server::bind(address)?;
    let server_ref2 = server_ref.clone();
    thread::spawn(move || Server::start(server_ref2, listener));

    run_console(&server_ref)?;

    server_ref.shutdown()?;
    Ok(())
}

/// Reads commands from stdin until `stop` or end of input.
fn run_console(server: &Server) -> io::Result<()> {
    for line in io::stdin().lock().lines() {
        let line = line?;
        let (command, args) = line.trim().split_once(' ').unwrap_or((line.trim(), ""));
        match command {
            "" => (),
            "say" => server.say(args.trim()),
            "save" => {
                if let Err(e) = server.save() {
                    error!("Failed to save: {}", e);
                }
            }
            "stop" => return Ok(()),
            "help" => println!("{}", HELP),
            _ => println!("Unknown command '{}', try 'help'", command)
        }
    }

    Ok(())
}
