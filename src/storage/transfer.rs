use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::storage::{CatalogResult, DownloadRequest, TransferTrait, UploadRequest};
use crate::types::error::CatalogError;

/// Transfer binding that shells out to the `rucio` command line client.
#[derive(Debug, Clone)]
pub struct RucioCommandTransfer {
    command: PathBuf,
}

impl RucioCommandTransfer {
    pub fn new(client_config: &ClientConfig) -> Self {
        Self {
            command: client_config.rucio_command.clone(),
        }
    }

    async fn run(&self, args: Vec<OsString>, what: &str) -> CatalogResult<()> {
        debug!(command = %self.command.display(), args = ?args, "running transfer command.");

        let output = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                CatalogError::Rejected(format!(
                    "{what}: could not run '{}': {e}",
                    self.command.display()
                ))
            })?;

        if output.status.success() {
            info!(operation = what, "transfer finished.");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CatalogError::Rejected(format!(
            "{what}: exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

pub(crate) fn download_args(request: &DownloadRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["download".into()];
    if let Some(base_dir) = &request.base_dir {
        args.push("--dir".into());
        args.push(base_dir.clone().into_os_string());
    }
    if let Some(rse) = &request.rse {
        args.push("--rse".into());
        args.push(rse.into());
    }
    args.push(request.did.to_string().into());
    args
}

pub(crate) fn upload_args(request: &UploadRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "upload".into(),
        "--rse".into(),
        (&request.rse).into(),
        "--scope".into(),
        (&request.scope).into(),
        "--lifetime".into(),
        request.lifetime_seconds.to_string().into(),
    ];
    if let Some(dataset) = &request.dataset {
        args.push(format!("{}:{dataset}", request.scope).into());
    }
    args.push(request.path.clone().into_os_string());
    args
}

#[async_trait]
impl TransferTrait for RucioCommandTransfer {
    async fn download(&self, request: &DownloadRequest) -> CatalogResult<()> {
        self.run(download_args(request), &format!("download {}", request.did))
            .await
    }

    async fn upload(&self, request: &UploadRequest) -> CatalogResult<()> {
        self.run(
            upload_args(request),
            &format!("upload {} to {}", request.path.display(), request.rse),
        )
        .await
    }
}
