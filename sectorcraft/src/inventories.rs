use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::*;
use serde_json::{Map, Value};

use sectorcraft_core::inventory::{Inventory, InventoryStore};
use sectorcraft_core::storage::region::write_atomic;

/// Inventories kept in a JSON object of username to base64 blob.
pub struct JsonInventoryStore {
    path: PathBuf,
    inventories: Mutex<HashMap<String, Inventory>>
}

impl JsonInventoryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<JsonInventoryStore> {
        let path = path.as_ref().to_owned();
        let mut inventories = HashMap::new();

        match File::open(&path) {
            Ok(file) => {
                let value: Value = serde_json::from_reader(BufReader::new(file))?;
                for (username, blob) in value.as_object().into_iter().flatten() {
                    let inventory = blob.as_str()
                        .and_then(|blob| STANDARD.decode(blob).ok())
                        .and_then(|bytes| Inventory::from_bytes(&bytes));
                    match inventory {
                        Some(inventory) => { inventories.insert(username.clone(), inventory); }
                        None => warn!("Ignoring invalid inventory of {} in {}", username, path.display())
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => return Err(e)
        }

        info!("Loaded {} inventories from {}", inventories.len(), path.display());
        Ok(JsonInventoryStore {
            path,
            inventories: Mutex::new(inventories)
        })
    }
}

impl JsonInventoryStore {
    /// Callers hold the map lock so writers don't interleave.
    fn write(&self, inventories: &HashMap<String, Inventory>) -> io::Result<()> {
        let object: Map<String, Value> = inventories
            .iter()
            .map(|(username, inventory)| (username.clone(), Value::String(STANDARD.encode(inventory.as_bytes()))))
            .collect();

        write_atomic(&self.path, |file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &Value::Object(object))?;
            writer.flush()
        })
    }
}

impl InventoryStore for JsonInventoryStore {
    fn load(&self, username: &str) -> Option<Inventory> {
        self.inventories.lock().unwrap().get(username).cloned()
    }

    fn save(&self, username: &str, inventory: &Inventory) -> io::Result<()> {
        let mut inventories = self.inventories.lock().unwrap();
        inventories.insert(username.to_owned(), inventory.clone());
        self.write(&inventories)
    }

    fn flush(&self) -> io::Result<()> {
        let inventories = self.inventories.lock().unwrap();
        self.write(&inventories)
    }
}
