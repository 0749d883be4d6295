use std::{env, io, num::NonZeroUsize, str::FromStr};

use serde::{Deserialize, Serialize};

const DEFAULT_HOST: &str = "127.0.0.1";

/// The shape of a replica exchange run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommConfig {
    /// Atoms per replica.
    pub n_atoms: NonZeroUsize,
    /// Replicas in the run, one per process.
    pub n_replicas: NonZeroUsize,
    /// Springs of the coupling subsystem, carried along but unused here.
    pub n_springs: NonZeroUsize,
}

/// Everything a single rank needs to start, read from the environment.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub host: String,
    pub port: u16,
    pub rank: usize,
    pub world_size: usize,
    pub comm: CommConfig,
}

impl LaunchConfig {
    /// Reads the launch configuration from the environment.
    ///
    /// `PORT`, `RANK`, `WORLD_SIZE`, `N_ATOMS` and `N_SPRINGS` are required, `HOST`
    /// defaults to the loopback address and `N_REPLICAS` to `WORLD_SIZE`.
    pub fn from_env() -> io::Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = parse_var("PORT")?;
        let rank = parse_var("RANK")?;
        let world_size = parse_var("WORLD_SIZE")?;

        let n_replicas = match env::var("N_REPLICAS") {
            Ok(_) => parse_var("N_REPLICAS")?,
            Err(_) => NonZeroUsize::new(world_size).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "WORLD_SIZE must not be zero")
            })?,
        };

        let comm = CommConfig {
            n_atoms: parse_var("N_ATOMS")?,
            n_replicas,
            n_springs: parse_var("N_SPRINGS")?,
        };

        Ok(Self {
            host,
            port,
            rank,
            world_size,
            comm,
        })
    }

    /// The address the master listens at.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(key: &str) -> io::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = env::var(key)
        .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("{key}: {e}")))?;

    value
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{key}={value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_config_from_json() {
        let json = r#"{ "n_atoms": 500, "n_replicas": 4, "n_springs": 100 }"#;
        let config: CommConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.n_atoms.get(), 500);
        assert_eq!(config.n_replicas.get(), 4);
        assert_eq!(config.n_springs.get(), 100);
    }

    #[test]
    fn comm_config_rejects_zero() {
        let json = r#"{ "n_atoms": 0, "n_replicas": 4, "n_springs": 100 }"#;
        assert!(serde_json::from_str::<CommConfig>(json).is_err());
    }
}
