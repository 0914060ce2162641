use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Notebox: folders and tagged notes kept in local storage units.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the unit registry and every unit's database.
    #[arg(long, global = true, env = "NOTEBOX_DATA_DIR", default_value = ".notebox")]
    pub data_dir: PathBuf,

    /// Increase verbosity (use multiple times for more).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage storage units.
    Unit(UnitArgs),
    /// Manage the folders of a unit.
    Folder(FolderArgs),
    /// Manage the notes of a unit.
    Note(NoteArgs),
    /// List the tags in use in a unit.
    Tags {
        /// Unit id or name.
        unit: String,
    },
}

#[derive(Args, Debug)]
pub struct UnitArgs {
    #[command(subcommand)]
    pub command: UnitCommands,
}

#[derive(Subcommand, Debug)]
pub enum UnitCommands {
    /// List registered units.
    List {},
    /// Register a new, empty unit.
    Create {
        name: String,
    },
    /// Forget a unit. Its data stays on disk.
    Remove {
        /// Unit id or name.
        unit: String,
    },
    /// Delete a unit together with all of its data.
    Destroy {
        /// Unit id or name.
        unit: String,
        /// Skip confirmation.
        #[arg(long, short)]
        force: bool,
    },
}

#[derive(Args, Debug)]
pub struct FolderArgs {
    #[command(subcommand)]
    pub command: FolderCommands,
}

#[derive(Subcommand, Debug)]
pub enum FolderCommands {
    /// List the folders of a unit.
    List {
        unit: String,
    },
    /// Create a folder. Its parent must exist.
    Create {
        unit: String,
        path: String,
        #[arg(long)]
        color: Option<String>,
        /// Normalize the path instead of rejecting it when it is malformed.
        #[arg(long)]
        normalize: bool,
    },
    /// Set or clear the color of a folder.
    Color {
        unit: String,
        path: String,
        /// New color. Omit to clear.
        color: Option<String>,
    },
    /// Remove a folder with every folder and note below it.
    Remove {
        unit: String,
        path: String,
    },
}

#[derive(Args, Debug)]
pub struct NoteArgs {
    #[command(subcommand)]
    pub command: NoteCommands,
}

#[derive(Subcommand, Debug)]
pub enum NoteCommands {
    /// List notes, optionally restricted to one folder or one tag.
    List {
        unit: String,
        #[arg(long, conflicts_with = "tag")]
        folder: Option<String>,
        #[arg(long, conflicts_with = "folder")]
        tag: Option<String>,
    },
    /// Create a note in an existing folder.
    Create {
        unit: String,
        folder: String,
        #[arg(long, short)]
        title: String,
        #[arg(long, short, default_value = "")]
        content: String,
        /// Tag to attach; repeat for several.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Print one note.
    Show {
        unit: String,
        id: String,
    },
    /// Change fields of a note. Unset options keep their value.
    Update {
        unit: String,
        id: String,
        #[arg(long, short)]
        title: Option<String>,
        #[arg(long, short)]
        content: Option<String>,
        /// Replace the tag set; repeat for several.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Remove every tag.
        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
        /// Move the note to another existing folder.
        #[arg(long)]
        move_to: Option<String>,
    },
    /// Delete a note.
    Remove {
        unit: String,
        id: String,
    },
}
