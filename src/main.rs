use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use walkdir::WalkDir;

use photo_gallery::report::format_size;
use photo_gallery::{telemetry, Config, GalleryService, IngestError, IngestResult, PhotoSource, RawFile, Role};

#[derive(Parser, Debug)]
#[command(name = "photo-gallery")]
#[command(about = "Multi-tenant photo gallery", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// YAML configuration file (a missing file means defaults)
    #[arg(short = 'f', long, env = "GALLERY_CONFIG", default_value = "gallery.yaml", global = true)]
    config: PathBuf,

    /// Act as this user
    #[arg(long, env = "GALLERY_USER", global = true)]
    user: Option<Uuid>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage accounts
    #[command(subcommand)]
    User(UserCommand),
    /// Manage the session user's folders
    #[command(subcommand)]
    Folder(FolderCommand),
    /// Ingest, rename, delete and export photos
    #[command(subcommand)]
    Photo(PhotoCommand),
    /// Administrator views and user management
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Register an account; the first account may be an admin
    Add {
        name: String,
        email: String,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
    /// List every account (admin only)
    List,
}

#[derive(Subcommand, Debug)]
enum FolderCommand {
    Create {
        name: String,
        /// Create the folder for another user (admin only)
        #[arg(long)]
        owner: Option<Uuid>,
    },
    Rename {
        folder: Uuid,
        name: String,
    },
    /// Delete a folder and every photo in it
    Delete {
        folder: Uuid,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum PhotoCommand {
    /// Ingest image files; directories are walked recursively
    Ingest {
        folder: Uuid,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    Rename {
        photo: Uuid,
        name: String,
    },
    Delete {
        #[arg(required = true)]
        photos: Vec<Uuid>,
    },
    /// Write a photo's stored bytes to a file
    Export {
        photo: Uuid,
        dest: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Storage usage across all users
    Storage {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// A user's folders and photo counts
    User {
        user: Uuid,
    },
    /// Change another user's role
    Role {
        user: Uuid,
        /// `user` or `admin`
        role: Role,
    },
    /// Delete a user together with all of their folders and photos
    DeleteUser {
        user: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.global.config)
        .with_context(|| format!("loading configuration from {}", cli.global.config.display()))?;
    telemetry::init_logging(&config.log_filter)?;

    let mut gallery = GalleryService::from_config(&config, cli.global.user).context("opening gallery")?;

    match cli.command {
        Commands::User(command) => user_command(&gallery, command).await,
        Commands::Folder(command) => folder_command(&mut gallery, command).await,
        Commands::Photo(command) => photo_command(&mut gallery, command).await,
        Commands::Admin(command) => admin_command(&mut gallery, command).await,
    }
}

async fn user_command(gallery: &GalleryService, command: UserCommand) -> Result<()> {
    match command {
        UserCommand::Add { name, email, admin } => {
            let role = if admin { Role::Admin } else { Role::User };
            let user = gallery.register_user(&name, &email, role).await?;
            println!("✅ Registered {} ({}) as {}", user.name, user.id, user.role);
        }
        UserCommand::List => {
            for user in gallery.list_users().await? {
                println!("{}  {:<6} {} <{}>", user.id, user.role, user.name, user.email);
            }
        }
    }
    Ok(())
}

async fn folder_command(gallery: &mut GalleryService, command: FolderCommand) -> Result<()> {
    match command {
        FolderCommand::Create { name, owner } => {
            let folder = match owner {
                Some(owner) => gallery.create_folder_for(owner, &name).await?,
                None => gallery.create_folder(&name).await?,
            };
            println!("✅ Created folder {} ({})", folder.name, folder.id);
        }
        FolderCommand::Rename { folder, name } => {
            let folder = gallery.rename_folder(folder, &name).await?;
            println!("✅ Renamed folder {} to {}", folder.id, folder.name);
        }
        FolderCommand::Delete { folder } => {
            gallery.delete_folder(folder).await?;
            println!("🗑️  Deleted folder {}", folder);
        }
        FolderCommand::List => {
            let view = gallery.refresh().await?;
            for folder in view.folders() {
                println!(
                    "{}  {:<30} {:>5} photos  {}",
                    folder.folder.id,
                    folder.folder.name,
                    folder.photo_count(),
                    format_size(folder.total_bytes())
                );
            }
        }
    }
    Ok(())
}

/// Expand `paths` into files, walking directories in a stable order. Entries
/// the walk cannot reach are reported per path instead of being skipped.
fn collect_paths(paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<IngestError>) {
    let mut files = Vec::new();
    let mut failures = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }

        for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(err) => {
                    let file_name = err.path().unwrap_or(path).display().to_string();
                    failures.push(IngestError::Unreadable {
                        file_name,
                        source: err.into(),
                    });
                }
            }
        }
    }
    (files, failures)
}

/// Load every path, keeping the ones that fail as per-file errors
async fn load_files(paths: &[PathBuf], max_file_bytes: u64) -> (Vec<RawFile>, Vec<IngestError>) {
    let (paths, mut failures) = collect_paths(paths);
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        match RawFile::load(&path, max_file_bytes).await {
            Ok(file) => files.push(file),
            Err(error) => failures.push(error),
        }
    }
    (files, failures)
}

async fn photo_command(gallery: &mut GalleryService, command: PhotoCommand) -> Result<()> {
    match command {
        PhotoCommand::Ingest { folder, paths } => {
            let (files, unread) = load_files(&paths, gallery.policy().max_file_bytes).await;
            for error in &unread {
                tracing::warn!(file_name = %error.file_name(), "{}", error);
            }

            // Ctrl-C stops the batch between files
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            println!("🔍 Ingesting {} file(s) into {}", files.len() + unread.len(), folder);
            for error in &unread {
                println!("  ⚠️  {}", error);
            }

            let result = if files.is_empty() {
                IngestResult::default()
            } else {
                gallery.ingest(files, folder, &cancel).await?
            };

            for outcome in &result.outcomes {
                match &outcome.result {
                    Ok(photo) => println!("  ✅ {} -> {} ({})", outcome.file_name, photo.id, format_size(photo.size)),
                    Err(error) => println!("  ⚠️  {}", error),
                }
            }

            let failed = result.failure_count() + unread.len();
            println!(
                "📊 Ingest summary: {} stored, {} failed",
                result.success_count(),
                failed
            );

            if failed > 0 {
                bail!("{} file(s) could not be ingested", failed);
            }
        }
        PhotoCommand::Rename { photo, name } => {
            let photo = gallery.rename_photo(photo, &name).await?;
            println!("✅ Renamed photo {} to {}", photo.id, photo.name);
        }
        PhotoCommand::Delete { photos } => {
            let removed = gallery.delete_photos(&photos).await?;
            println!("🗑️  Deleted {} photo(s)", removed);
        }
        PhotoCommand::Export { photo, dest } => {
            let (record, bytes) = gallery.fetch_photo(photo).await?;
            write_export(&dest, &bytes).await?;
            println!("✅ Exported {} to {}", record.name, dest.display());

            if let PhotoSource::Url(url) = gallery.resolve_photo(photo).await? {
                println!("   source: {}", url);
            }
        }
    }
    Ok(())
}

async fn write_export(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, bytes)
        .await
        .with_context(|| format!("writing {}", dest.display()))
}

async fn admin_command(gallery: &mut GalleryService, command: AdminCommand) -> Result<()> {
    match command {
        AdminCommand::Storage { json } => {
            let report = gallery.storage_report().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!(
                "Storage: {} of {} used ({:.2}%)",
                format_size(report.used_bytes),
                format_size(report.capacity_bytes),
                report.usage_percent()
            );
            println!(
                "{} users, {} folders, {} photos",
                report.total_users, report.total_folders, report.total_photos
            );
            for usage in &report.per_user {
                println!(
                    "  {:<24} {:>10}  {:>5} photos  {:>3} folders",
                    usage.user_name,
                    format_size(usage.used_bytes),
                    usage.photo_count,
                    usage.folder_count
                );
            }
        }
        AdminCommand::User { user } => {
            let details = gallery.user_details(user).await?;
            println!(
                "{} <{}> ({}), joined {}",
                details.user.name,
                details.user.email,
                details.user.role,
                details.user.created_at.format("%Y-%m-%d")
            );
            println!(
                "{} photos, {}",
                details.photo_count(),
                format_size(details.used_bytes())
            );
            for folder in &details.folders {
                println!(
                    "  {}  {:<30} {:>5} photos",
                    folder.folder.id,
                    folder.folder.name,
                    folder.photo_count()
                );
            }
        }
        AdminCommand::Role { user, role } => {
            let user = gallery.set_user_role(user, role).await?;
            println!("✅ {} ({}) is now {}", user.name, user.id, user.role);
        }
        AdminCommand::DeleteUser { user } => {
            gallery.delete_user(user).await?;
            println!("🗑️  Deleted user {} and all of their photos", user);
        }
    }
    Ok(())
}
