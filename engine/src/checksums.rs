//! Post-copy verification digests.
//!
//! A copied file is re-read from disk and its digest compared with the
//! source's. MD5 is the default; SHA-256 and BLAKE3 can be selected per run.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::error::FileError;
use crate::model::{FileTask, DEFAULT_CHUNK_SIZE};

/// Digest used to verify copied files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// MD5 (fast, sufficient for accidental corruption)
    Md5,
    Sha256,
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "unknown checksum algorithm '{}' (expected md5, sha256 or blake3)",
                other
            )),
        }
    }
}

/// Hex digest tagged with the algorithm that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// `md5:<hex>`, as shown in verbose logs
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Incremental digest over a byte stream.
pub trait ChecksumHasher {
    fn update(&mut self, data: &[u8]);

    fn finalize(self: Box<Self>) -> ChecksumValue;
}

struct Md5Hasher {
    context: md5::Context,
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.context.compute();
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", digest))
    }
}

struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Blake3, digest.to_hex().to_string())
    }
}

pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher {
            context: md5::Context::new(),
        }),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

/// Compute the checksum of a file, streaming it in 64 KiB reads.
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<ChecksumValue, FileError> {
    let checksum_error = |e: io::Error| FileError::Checksum {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = File::open(path).map_err(checksum_error)?;
    let mut hasher = create_hasher(algorithm);
    let mut buffer = vec![0u8; DEFAULT_CHUNK_SIZE];

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(checksum_error(e)),
        }
    }

    Ok(hasher.finalize())
}

/// Verify a copied task's destination against its source.
///
/// Stores both digests on the task. Returns `Ok(false)` on a mismatch and
/// `Err` only if a digest cannot be computed.
pub fn verify_task(task: &mut FileTask, algorithm: ChecksumAlgorithm) -> Result<bool, FileError> {
    let source_checksum = match task.source_checksum {
        Some(ref cs) if cs.algorithm() == algorithm => cs.clone(),
        _ => {
            let cs = compute_file_checksum(&task.source_path, algorithm)?;
            task.source_checksum = Some(cs.clone());
            cs
        }
    };

    let dest_checksum = compute_file_checksum(task.written_path(), algorithm)?;
    task.dest_checksum = Some(dest_checksum.clone());

    Ok(source_checksum.hex() == dest_checksum.hex())
}
