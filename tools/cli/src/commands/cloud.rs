//! `flextk cloud <provider> ...`

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use flextk_common::{Error, ObjectPath};
use flextk_config::ProviderSettings;
use flextk_storage::{
    create_default_registry, B2BucketType, B2Store, BucketFile, ByteStream, GcsStore,
    ObjectStore,
};

use super::{parse_object, print_json};
use crate::context::{overrides, Context};

#[derive(Subcommand)]
pub enum CloudCommand {
    /// Google Cloud Storage.
    Gcs {
        #[command(flatten)]
        creds: GcsCreds,
        #[command(subcommand)]
        action: GcsAction,
    },
    /// BackBlaze B2.
    Bb2 {
        #[command(flatten)]
        creds: Bb2Creds,
        #[command(subcommand)]
        action: Bb2Action,
    },
    /// AWS S3 or an S3-compatible service.
    S3 {
        #[command(flatten)]
        creds: S3Creds,
        #[command(subcommand)]
        action: ObjectAction,
    },
    /// Google Drive.
    Drive {
        #[command(flatten)]
        creds: DriveCreds,
        #[command(subcommand)]
        action: ObjectAction,
    },
}

#[derive(Args)]
pub struct GcsCreds {
    #[arg(long = "bucket_name", alias = "bucket-name", env = "GCS_BUCKET")]
    bucket_name: Option<String>,
    #[arg(
        long = "service_account",
        alias = "service-account",
        env = "GOOGLE_APPLICATION_CREDENTIALS"
    )]
    service_account: Option<PathBuf>,
}

#[derive(Args)]
pub struct Bb2Creds {
    #[arg(long = "app_id", alias = "app-id", env = "B2_APPLICATION_KEY_ID")]
    app_id: Option<String>,
    #[arg(
        long = "app_key",
        alias = "app-key",
        env = "B2_APPLICATION_KEY",
        hide_env_values = true
    )]
    app_key: Option<String>,
    #[arg(long = "bucket_name", alias = "bucket-name")]
    bucket_name: Option<String>,
}

#[derive(Args)]
pub struct S3Creds {
    #[arg(long = "access_key", alias = "access-key", env = "AWS_ACCESS_KEY_ID")]
    access_key: Option<String>,
    #[arg(
        long = "secret_key",
        alias = "secret-key",
        env = "AWS_SECRET_ACCESS_KEY",
        hide_env_values = true
    )]
    secret_key: Option<String>,
    #[arg(long = "bucket_name", alias = "bucket-name")]
    bucket_name: Option<String>,
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Args)]
pub struct DriveCreds {
    #[arg(long = "service_account", alias = "service-account")]
    service_account: Option<PathBuf>,
    #[arg(long = "folder_id", alias = "folder-id")]
    folder_id: Option<String>,
}

fn path_text(path: Option<PathBuf>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

#[derive(Subcommand)]
pub enum ObjectAction {
    /// Upload a local file.
    UploadFile {
        /// Local file to upload.
        #[arg(long = "file_path", alias = "file-path")]
        file_path: PathBuf,
        /// Remote path; defaults to the local file name.
        #[arg(long = "remote_path", alias = "remote-path")]
        remote_path: Option<String>,
        #[arg(long = "content_type", alias = "content-type")]
        content_type: Option<String>,
    },
    /// Download an object to a local file.
    DownloadFile {
        #[arg(long = "remote_path", alias = "remote-path")]
        remote_path: String,
        /// Local destination; defaults to the object name in the current directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List objects under a prefix.
    List {
        #[arg(long, default_value = "/")]
        prefix: String,
    },
    /// Delete an object.
    Delete {
        #[arg(long = "remote_path", alias = "remote-path")]
        remote_path: String,
    },
    /// Show an object's metadata.
    Info {
        #[arg(long = "remote_path", alias = "remote-path")]
        remote_path: String,
    },
}

#[derive(Subcommand)]
pub enum GcsAction {
    #[command(flatten)]
    Object(ObjectAction),
    /// List the buckets of the service account's project.
    ListBuckets {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long = "max_results", alias = "max-results")]
        max_results: Option<usize>,
    },
    /// Copy an object, optionally into another bucket.
    Copy {
        #[arg(long = "remote_path", alias = "remote-path")]
        remote_path: String,
        #[arg(long)]
        destination: String,
        #[arg(long = "destination_bucket", alias = "destination-bucket")]
        destination_bucket: Option<String>,
    },
    /// Move an object, optionally into another bucket.
    Move {
        #[arg(long = "remote_path", alias = "remote-path")]
        remote_path: String,
        #[arg(long)]
        destination: String,
        #[arg(long = "destination_bucket", alias = "destination-bucket")]
        destination_bucket: Option<String>,
    },
    /// Create an empty folder placeholder.
    CreateFolder { folder: String },
    /// List the folders directly below a path.
    ListFolders {
        #[arg(default_value = "/")]
        parent: String,
    },
}

#[derive(Subcommand)]
pub enum Bb2Action {
    #[command(flatten)]
    Object(ObjectAction),
    /// List buckets visible to the key.
    ListBuckets,
    /// Create a bucket.
    CreateBucket {
        name: String,
        /// allPublic or allPrivate.
        #[arg(long = "bucket_type", alias = "bucket-type", default_value = "allPrivate")]
        bucket_type: B2BucketType,
    },
    /// Delete the configured bucket; it must be empty.
    DeleteBucket,
    /// Change the configured bucket's type or info.
    UpdateBucket {
        /// allPublic or allPrivate.
        #[arg(long = "bucket_type", alias = "bucket-type")]
        bucket_type: Option<B2BucketType>,
        /// Bucket info as a JSON object.
        #[arg(long = "bucket_info", alias = "bucket-info")]
        bucket_info: Option<String>,
    },
    /// Show a file version by its B2 file id.
    FileDetails {
        #[arg(long = "file_id", alias = "file-id")]
        file_id: String,
    },
    /// Print a time-limited download URL for an object.
    DownloadUrl {
        #[arg(long = "remote_path", alias = "remote-path")]
        remote_path: String,
        /// Validity in seconds; private buckets only.
        #[arg(long = "valid_for", alias = "valid-for")]
        valid_for: Option<u64>,
    },
}

pub async fn run(ctx: &Context, cmd: CloudCommand) -> Result<()> {
    match cmd {
        CloudCommand::Gcs { creds, action } => {
            let section = overrides([
                ("bucket_name", creds.bucket_name),
                ("service_account", path_text(creds.service_account)),
            ]);
            match action {
                GcsAction::Object(action) => {
                    run_object_action(open_store(ctx, "gcs", section)?, action).await
                }
                action => {
                    let settings = match ctx.settings("gcs", section)? {
                        ProviderSettings::Gcs(s) => s,
                        other => {
                            anyhow::bail!("Unexpected settings for gcs: {}", other.section_name())
                        }
                    };
                    let store = GcsStore::from_settings(&settings)?;
                    run_gcs_action(store, action).await
                }
            }
        }
        CloudCommand::S3 { creds, action } => {
            let section = overrides([
                ("access_key", creds.access_key),
                ("secret_key", creds.secret_key),
                ("bucket_name", creds.bucket_name),
                ("region", creds.region),
                ("endpoint", creds.endpoint),
            ]);
            let store = open_store(ctx, "s3", section)?;
            run_object_action(store, action).await
        }
        CloudCommand::Drive { creds, action } => {
            let section = overrides([
                ("service_account", path_text(creds.service_account)),
                ("folder_id", creds.folder_id),
            ]);
            let store = open_store(ctx, "drive", section)?;
            run_object_action(store, action).await
        }
        CloudCommand::Bb2 { creds, action } => {
            let section = overrides([
                ("app_id", creds.app_id),
                ("app_key", creds.app_key),
                ("bucket_name", creds.bucket_name),
            ]);
            let settings = match ctx.settings("bb2", section)? {
                ProviderSettings::Bb2(s) => s,
                other => anyhow::bail!("Unexpected settings for bb2: {}", other.section_name()),
            };
            let store = B2Store::from_settings(&settings);
            run_b2_action(store, action).await
        }
    }
}

fn open_store(
    ctx: &Context,
    provider: &str,
    section: flextk_config::Section,
) -> Result<Arc<dyn ObjectStore>> {
    let settings = ctx.settings(provider, section)?;
    let registry = create_default_registry();
    let store = registry
        .resolve(provider, &settings.to_section()?)
        .with_context(|| format!("Failed to open {} store", provider))?;
    debug!("Opened {} bucket '{}'", store.name(), store.bucket());
    Ok(store)
}

async fn run_gcs_action(store: GcsStore, action: GcsAction) -> Result<()> {
    match action {
        GcsAction::Object(action) => run_object_action(Arc::new(store), action).await,
        GcsAction::ListBuckets {
            prefix,
            max_results,
        } => {
            let buckets = store
                .list_buckets(prefix.as_deref(), max_results)
                .await
                .context("Failed to list buckets")?;
            print_json(&buckets)
        }
        GcsAction::Copy {
            remote_path,
            destination,
            destination_bucket,
        } => {
            let source = ObjectPath::parse(&remote_path)?;
            let target = ObjectPath::parse(&destination)?;
            let file = store
                .copy_object(&source, &target, destination_bucket.as_deref())
                .await
                .with_context(|| format!("Failed to copy {}", source))?;
            println!("Copied {} to {}/{}", source, file.bucket, file.path);
            Ok(())
        }
        GcsAction::Move {
            remote_path,
            destination,
            destination_bucket,
        } => {
            let source = ObjectPath::parse(&remote_path)?;
            let target = ObjectPath::parse(&destination)?;
            let file = store
                .move_object(&source, &target, destination_bucket.as_deref())
                .await
                .with_context(|| format!("Failed to move {}", source))?;
            println!("Moved {} to {}/{}", source, file.bucket, file.path);
            Ok(())
        }
        GcsAction::CreateFolder { folder } => {
            let folder = ObjectPath::parse(&folder)?;
            let file = store
                .create_folder(&folder)
                .await
                .with_context(|| format!("Failed to create folder {}", folder))?;
            println!("Created folder {}", file.path);
            Ok(())
        }
        GcsAction::ListFolders { parent } => {
            let parent = ObjectPath::parse(&parent)?;
            let folders = store
                .list_folders(&parent)
                .await
                .context("Failed to list folders")?;
            for folder in folders {
                println!("{}/", folder);
            }
            Ok(())
        }
    }
}

async fn run_b2_action(store: B2Store, action: Bb2Action) -> Result<()> {
    match action {
        Bb2Action::Object(action) => run_object_action(Arc::new(store), action).await,
        Bb2Action::ListBuckets => {
            let buckets = store.list_buckets().await.context("Failed to list buckets")?;
            for bucket in buckets {
                println!(
                    "{}  {:<10}  {}",
                    bucket.bucket_id, bucket.bucket_type, bucket.bucket_name
                );
            }
            Ok(())
        }
        Bb2Action::CreateBucket { name, bucket_type } => {
            let bucket = store
                .create_bucket(&name, bucket_type)
                .await
                .with_context(|| format!("Failed to create bucket '{}'", name))?;
            println!("Created bucket {} ({})", bucket.bucket_name, bucket.bucket_type);
            println!("  ID: {}", bucket.bucket_id);
            Ok(())
        }
        Bb2Action::DeleteBucket => {
            let bucket = store.delete_bucket().await.context("Failed to delete bucket")?;
            println!("Deleted bucket {}", bucket.bucket_name);
            Ok(())
        }
        Bb2Action::UpdateBucket {
            bucket_type,
            bucket_info,
        } => {
            let bucket_info = bucket_info.as_deref().map(parse_object).transpose()?;
            let bucket = store
                .update_bucket(bucket_type, bucket_info)
                .await
                .context("Failed to update bucket")?;
            println!("Updated bucket {} ({})", bucket.bucket_name, bucket.bucket_type);
            Ok(())
        }
        Bb2Action::FileDetails { file_id } => {
            let file = store
                .file_details(&file_id)
                .await
                .with_context(|| format!("Failed to read file {}", file_id))?;
            print_json(&file)
        }
        Bb2Action::DownloadUrl {
            remote_path,
            valid_for,
        } => {
            let path = ObjectPath::parse(&remote_path)?;
            let url = store
                .download_url(&path, valid_for)
                .await
                .context("Failed to build download URL")?;
            println!("{}", url);
            Ok(())
        }
    }
}

async fn run_object_action(store: Arc<dyn ObjectStore>, action: ObjectAction) -> Result<()> {
    match action {
        ObjectAction::UploadFile {
            file_path,
            remote_path,
            content_type,
        } => cmd_upload(store.as_ref(), &file_path, remote_path, content_type).await,
        ObjectAction::DownloadFile {
            remote_path,
            output,
        } => cmd_download(store.as_ref(), &remote_path, output).await,
        ObjectAction::List { prefix } => {
            let prefix = ObjectPath::parse(&prefix)?;
            let files = store.list(&prefix).await.context("Failed to list objects")?;
            for file in &files {
                print_listing(file);
            }
            println!("{} objects", files.len());
            Ok(())
        }
        ObjectAction::Delete { remote_path } => {
            let path = ObjectPath::parse(&remote_path)?;
            store
                .delete(&path)
                .await
                .with_context(|| format!("Failed to delete {}", path))?;
            println!("Deleted {}", path);
            Ok(())
        }
        ObjectAction::Info { remote_path } => {
            let path = ObjectPath::parse(&remote_path)?;
            let file = store
                .metadata(&path)
                .await
                .with_context(|| format!("Failed to read metadata of {}", path))?;
            print_json(&file)
        }
    }
}

fn print_listing(file: &BucketFile) {
    let modified = file
        .modified
        .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("{:>12}  {:<19}  {}", file.size, modified, file.path);
}

async fn cmd_upload(
    store: &dyn ObjectStore,
    file_path: &Path,
    remote_path: Option<String>,
    content_type: Option<String>,
) -> Result<()> {
    if !file_path.is_file() {
        return Err(
            Error::NotFound(format!("Local file not found: {}", file_path.display())).into(),
        );
    }
    let remote = match remote_path {
        Some(p) => p,
        None => file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidInput("Cannot derive a remote name".to_string()))?,
    };
    let path = ObjectPath::parse(&remote)?;

    let data = tokio::fs::read(file_path)
        .await
        .with_context(|| format!("Failed to read {}", file_path.display()))?;
    let file = store
        .upload(&path, data, content_type.as_deref())
        .await
        .with_context(|| format!("Failed to upload to {}", path))?;

    info!("Uploaded {} to {}/{}", file_path.display(), store.bucket(), path);
    println!("Uploaded {} ({} bytes)", file.path, file.size);
    if let Some(url) = &file.public_url {
        println!("  URL: {}", url);
    }
    Ok(())
}

async fn cmd_download(
    store: &dyn ObjectStore,
    remote_path: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let path = ObjectPath::parse(remote_path)?;
    let target = match output {
        Some(p) => p,
        None => PathBuf::from(
            path.name()
                .ok_or_else(|| Error::InvalidInput("An object key is required".to_string()))?,
        ),
    };

    let stream = store
        .download_stream(&path)
        .await
        .with_context(|| format!("Failed to download {}", path))?;
    let written = save_stream(stream, &target)
        .await
        .with_context(|| format!("Failed to download {}", path))?;

    println!("Downloaded {} to {} ({} bytes)", path, target.display(), written);
    Ok(())
}

/// Sibling file a download is staged in until the stream completes.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Write a download stream to `target`. The target is only replaced once
/// every chunk has arrived; on failure it keeps its previous contents.
async fn save_stream(stream: ByteStream, target: &Path) -> Result<u64> {
    let part = partial_path(target);
    match write_part(stream, &part).await {
        Ok(written) => {
            tokio::fs::rename(&part, target)
                .await
                .with_context(|| format!("Failed to move download to {}", target.display()))?;
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                debug!("Could not remove {}: {}", part.display(), cleanup);
            }
            Err(e)
        }
    }
}

async fn write_part(mut stream: ByteStream, part: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(part)
        .await
        .with_context(|| format!("Failed to create {}", part.display()))?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
