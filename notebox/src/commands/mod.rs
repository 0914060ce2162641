use anyhow::{Context, Result, anyhow, bail};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use notebox_core::DataStore;
use notebox_core::storage::path::{is_in_subtree, normalize_folder_path, validate_folder_path};
use notebox_core::storage::{Folder, FolderPatch, NewNote, Note, NotePatch};
use tracing::{info, warn};

use crate::cli::{FolderArgs, FolderCommands, NoteArgs, NoteCommands, UnitArgs, UnitCommands};

const CONTENT_WIDTH: usize = 80;

/// Accepts a unit id, or a name that matches exactly one unit.
pub fn resolve_unit(store: &DataStore, unit: &str) -> Result<String> {
    if store.units().iter().any(|u| u.id == unit) {
        return Ok(unit.to_string());
    }
    let mut by_name = store.units().iter().filter(|u| u.name == unit);
    match (by_name.next(), by_name.next()) {
        (Some(info), None) => Ok(info.id.clone()),
        (Some(_), Some(_)) => bail!("Several units are named '{}'; use the unit id instead", unit),
        (None, _) => bail!("No unit with id or name '{}'", unit),
    }
}

// --- Handler Functions ---

pub async fn handle_unit(args: UnitArgs, store: &mut DataStore) -> Result<()> {
    match args.command {
        UnitCommands::List {} => {
            if store.units().is_empty() {
                println!("No units registered.");
            }
            for unit in store.units() {
                println!("{}  {}", style(&unit.id).dim(), unit.name);
            }
        }
        UnitCommands::Create { name } => {
            let unit = store.create_unit(&name).await?;
            info!(unit = %unit.id, "Unit created");
            println!("Created unit '{}' ({})", unit.name, unit.id);
        }
        UnitCommands::Remove { unit } => {
            let id = resolve_unit(store, &unit)?;
            store.remove_unit(&id).await?;
            println!("Forgot unit {}. Its data was left in place.", id);
        }
        UnitCommands::Destroy { unit, force } => {
            let id = resolve_unit(store, &unit)?;
            if !force && !confirm(format!("Delete unit '{}' and all of its notes?", unit)).await? {
                println!("Aborted.");
                return Ok(());
            }
            store.destroy_unit(&id).await?;
            warn!(unit = %id, "Unit destroyed");
            println!("Destroyed unit {}", id);
        }
    }
    Ok(())
}

async fn confirm(prompt: String) -> Result<bool> {
    let answer = tokio::task::spawn_blocking(move || {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("Failed to read confirmation")
    })
    .await
    .context("Confirmation prompt panicked")??;
    Ok(answer)
}

pub async fn handle_folder(args: FolderArgs, store: &mut DataStore) -> Result<()> {
    match args.command {
        FolderCommands::List { unit } => {
            let id = resolve_unit(store, &unit)?;
            let folders = store.list_folders(&id)?;
            if folders.is_empty() {
                println!("No folders besides /.");
            }
            for folder in folders {
                print_folder(folder);
            }
        }
        FolderCommands::Create { unit, path, color, normalize } => {
            let id = resolve_unit(store, &unit)?;
            let path = if normalize && !validate_folder_path(&path) {
                let normalized = normalize_folder_path(&path);
                info!(from = %path, to = %normalized, "Normalized folder path");
                normalized
            } else {
                path
            };
            let mut initial = FolderPatch::new();
            if color.is_some() {
                initial = initial.color(color);
            }
            let folder = store.create_folder(&id, &path, initial).await?;
            println!("Created folder {}", folder.path);
        }
        FolderCommands::Color { unit, path, color } => {
            let id = resolve_unit(store, &unit)?;
            let folder = store.update_folder(&id, &path, FolderPatch::new().color(color)).await?;
            print_folder(&folder);
        }
        FolderCommands::Remove { unit, path } => {
            let id = resolve_unit(store, &unit)?;
            let notes = store
                .list_notes(&id)?
                .iter()
                .filter(|n| is_in_subtree(&n.folder, &path))
                .count();
            store.remove_folder(&id, &path).await?;
            println!("Removed {} and {} note(s) inside it", path, notes);
        }
    }
    Ok(())
}

fn print_folder(folder: &Folder) {
    match &folder.color {
        Some(color) => println!("{}  [{}]", style(&folder.path).bold(), color),
        None => println!("{}", style(&folder.path).bold()),
    }
}

pub async fn handle_note(args: NoteArgs, store: &mut DataStore) -> Result<()> {
    match args.command {
        NoteCommands::List { unit, folder, tag } => {
            let id = resolve_unit(store, &unit)?;
            let notes = match (folder, tag) {
                (Some(folder), _) => store.list_notes_by_folder(&id, &folder)?,
                (None, Some(tag)) => store.list_notes_by_tag(&id, &tag)?,
                (None, None) => store.list_notes(&id)?,
            };
            if notes.is_empty() {
                println!("No notes.");
            }
            for note in notes {
                print_note_line(note);
            }
        }
        NoteCommands::Create { unit, folder, title, content, tags } => {
            let id = resolve_unit(store, &unit)?;
            let note = store
                .create_note(&id, &folder, NewNote::new(title, content).with_tags(tags))
                .await?;
            println!("Created note {}", note.id);
        }
        NoteCommands::Show { unit, id } => {
            let unit = resolve_unit(store, &unit)?;
            let note = store.get_note(&unit, &id)?;
            print_note(note);
        }
        NoteCommands::Update { unit, id, title, content, tags, clear_tags, move_to } => {
            let unit = resolve_unit(store, &unit)?;
            let mut patch = NotePatch::new();
            if let Some(title) = title {
                patch = patch.title(title);
            }
            if let Some(content) = content {
                patch = patch.content(content);
            }
            if clear_tags || !tags.is_empty() {
                patch = patch.tags(tags);
            }
            if let Some(folder) = move_to {
                patch = patch.folder(folder);
            }
            if patch == NotePatch::new() {
                return Err(anyhow!("Nothing to update"));
            }
            let note = store.update_note(&unit, &id, patch).await?;
            print_note(&note);
        }
        NoteCommands::Remove { unit, id } => {
            let unit = resolve_unit(store, &unit)?;
            let note = store.remove_note(&unit, &id).await?;
            println!("Removed note '{}'", note.title);
        }
    }
    Ok(())
}

pub fn handle_tags(unit: &str, store: &DataStore) -> Result<()> {
    let id = resolve_unit(store, unit)?;
    for tag in store.list_tags(&id)? {
        let count = store.list_notes_by_tag(&id, tag)?.len();
        println!("{}  ({})", style(tag).cyan(), count);
    }
    Ok(())
}

fn print_note_line(note: &Note) {
    let tags: Vec<&str> = note.tags.iter().map(String::as_str).collect();
    println!(
        "{}  {}  {}  {}",
        style(&note.id).dim(),
        note.folder,
        style(&note.title).bold(),
        style(tags.join(", ")).cyan()
    );
}

fn print_note(note: &Note) {
    println!("{}", style(&note.title).bold());
    println!("  ID:      {}", note.id);
    println!("  Folder:  {}", note.folder);
    if !note.tags.is_empty() {
        let tags: Vec<&str> = note.tags.iter().map(String::as_str).collect();
        println!("  Tags:    {}", tags.join(", "));
    }
    println!("  Updated: {}", note.updated_at.to_rfc3339());
    if !note.content.is_empty() {
        println!();
        for line in textwrap::wrap(&note.content, CONTENT_WIDTH) {
            println!("  {}", line);
        }
    }
}
