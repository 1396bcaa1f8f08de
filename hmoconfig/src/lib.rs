//! # hmoconfig
//!
//! Configuration globale de HMOMusic. Un arbre YAML est chargé au premier
//! accès : défauts embarqués dans le binaire, puis fusion avec le premier
//! fichier trouvé (variable `HMOMUSIC_CONFIG`, `./.hmomusic.yml`,
//! `~/.hmomusic.yml`), puis surcharges par variables d'environnement
//! `HMOMUSIC_CONFIG__SECTION__CLE`.
//!
//! Les lecteurs typés ne paniquent jamais : une valeur absente ou mal typée
//! est signalée par un warning et remplacée par le défaut.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::{env, fs, path::PathBuf, sync::Arc};
use tracing::{info, warn};

/// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("hmomusic.yaml");

const ENV_CONFIG_FILE: &str = "HMOMUSIC_CONFIG";
const ENV_PREFIX: &str = "HMOMUSIC_CONFIG__";

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(Config::load());
}

/// Arbre de configuration immuable après chargement
#[derive(Debug, Clone)]
pub struct Config {
    data: Value,
}

impl Config {
    fn load() -> Self {
        let mut data: Value =
            serde_yaml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse");

        if let Some((path, external)) = read_external_file() {
            info!(config_file = %path.display(), "Loaded configuration file");
            merge_yaml(&mut data, &external);
        } else {
            info!("No configuration file found, using embedded defaults");
        }

        let mut data = lower_keys(data);
        apply_env_overrides(&mut data);

        Config { data }
    }

    /// Lit une valeur par chemin de clés (insensible à la casse)
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let mut current = &self.data;
        for (i, key) in path.iter().enumerate() {
            let Value::Mapping(map) = current else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            };
            match map.get(&Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            }
        }
        Ok(current.clone())
    }

    fn get_str(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            Ok(_) | Err(_) => {
                warn!(
                    "Config value {} missing or not a string, using {:?}",
                    path.join("."),
                    default
                );
                default.to_string()
            }
        }
    }

    fn get_bool(&self, path: &[&str], default: bool) -> bool {
        match self.get_value(path) {
            Ok(Value::Bool(b)) => b,
            Ok(_) | Err(_) => {
                warn!(
                    "Config value {} missing or not a boolean, using {}",
                    path.join("."),
                    default
                );
                default
            }
        }
    }

    /// Nom affiché de la bibliothèque (en-tête `icy-name` du flux)
    pub fn get_library_name(&self) -> String {
        self.get_str(&["library", "name"], "HMOMusic")
    }

    /// Désactivation des scanners de fichiers
    pub fn get_filescan_disable(&self) -> bool {
        self.get_bool(&["library", "filescan_disable"], false)
    }

    /// Conserver la file de lecture au démarrage
    pub fn get_clear_queue_on_stop_disable(&self) -> bool {
        self.get_bool(&["mpd", "clear_queue_on_stop_disable"], false)
    }

    /// Port HTTP du serveur
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap_or(3689) as u16,
            Ok(Value::String(s)) => s.parse().unwrap_or_else(|_| {
                warn!("Invalid HTTP port {:?}, using default 3689", s);
                3689
            }),
            _ => {
                warn!("HTTP port not configured, using default 3689");
                3689
            }
        }
    }

    /// URL de base annoncée aux clients, "localhost" si non configurée
    pub fn get_base_url(&self) -> String {
        self.get_str(&["host", "base_url"], "localhost")
    }
}

/// Retourne l'instance globale
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn read_external_file() -> Option<(PathBuf, Value)> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(p) = env::var(ENV_CONFIG_FILE) {
        if !p.is_empty() {
            candidates.push(PathBuf::from(p));
        }
    }
    candidates.push(PathBuf::from(".hmomusic.yml"));
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".hmomusic.yml"));
    }

    for path in candidates {
        match fs::read(&path) {
            Ok(bytes) => match serde_yaml::from_slice(&bytes) {
                Ok(value) => return Some((path, value)),
                Err(err) => {
                    warn!(config_file = %path.display(), "Cannot parse config file: {}", err);
                }
            },
            Err(_) => continue,
        }
    }
    None
}

fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        // scalaires et séquences : la valeur externe remplace
        (d, e) => *d = e.clone(),
    }
}

fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut out = Mapping::new();
            for (k, v) in map {
                let k = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                out.insert(k, lower_keys(v));
            }
            Value::Mapping(out)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys).collect()),
        other => other,
    }
}

fn apply_env_overrides(config: &mut Value) {
    for (key, raw) in env::vars() {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = suffix.split("__").map(|s| s.to_lowercase()).collect();
        let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        set_value(config, &path, value);
    }
}

fn set_value(data: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *data = value;
        return;
    };
    if let Value::Mapping(map) = data {
        let key = Value::String(head.clone());
        if rest.is_empty() {
            map.insert(key, value);
        } else {
            let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
            set_value(entry, rest, value);
        }
    }
}
