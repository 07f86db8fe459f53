//! Test fixtures and library helpers.
//!
//! Provides reopenable libraries and common seeded scenarios.

use crate::recording::RecordingSearchIndexer;
use bindery_core::{Config, Database, Library};
use bindery_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

enum Storage {
    Memory(InMemoryBackend),
    Dir(TempDir),
}

/// A test library with automatic cleanup.
///
/// Search work goes to a [`RecordingSearchIndexer`].
pub struct TestLibrary {
    library: Library,
    indexer: Arc<RecordingSearchIndexer>,
    storage: Storage,
    config: Config,
}

impl TestLibrary {
    /// Creates an in-memory library that survives [`TestLibrary::reopen`].
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates an in-memory library with a custom configuration.
    pub fn memory_with_config(config: Config) -> Self {
        let backend = InMemoryBackend::new();
        let indexer = Arc::new(RecordingSearchIndexer::new());
        let library = Self::open_memory(&backend, &config, &indexer);
        Self {
            library,
            indexer,
            storage: Storage::Memory(backend),
            config,
        }
    }

    /// Creates a library in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a directory library with a custom configuration.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let indexer = Arc::new(RecordingSearchIndexer::new());
        let library = Self::open_dir(temp_dir.path(), &config, &indexer);
        Self {
            library,
            indexer,
            storage: Storage::Dir(temp_dir),
            config,
        }
    }

    fn open_memory(backend: &InMemoryBackend, config: &Config, indexer: &Arc<RecordingSearchIndexer>) -> Library {
        let db = Database::open_with_backend(config.clone(), Box::new(backend.clone()))
            .expect("Failed to open in-memory database");
        Library::new(Arc::new(db), indexer.clone())
    }

    fn open_dir(path: &Path, config: &Config, indexer: &Arc<RecordingSearchIndexer>) -> Library {
        let db = Database::open_with_config(path, config.clone()).expect("Failed to open database directory");
        Library::new(Arc::new(db), indexer.clone())
    }

    /// Closes the library and opens it again from what was persisted,
    /// keeping the same recording indexer.
    pub fn reopen(self) -> Self {
        let Self {
            library,
            indexer,
            storage,
            config,
        } = self;
        library
            .close(Duration::from_secs(5))
            .expect("Failed to close library");
        drop(library);
        let library = match &storage {
            Storage::Memory(backend) => Self::open_memory(backend, &config, &indexer),
            Storage::Dir(dir) => Self::open_dir(dir.path(), &config, &indexer),
        };
        Self {
            library,
            indexer,
            storage,
            config,
        }
    }

    /// Drops the library without closing it, runs `damage` on the raw
    /// storage, then opens it again. Simulates a crash followed by restart.
    pub fn crash_and_reopen<F>(self, damage: F) -> Result<Self, bindery_core::CoreError>
    where
        F: FnOnce(&Path),
    {
        let Self {
            library,
            indexer,
            storage,
            config,
        } = self;
        drop(library);
        let Storage::Dir(dir) = &storage else {
            panic!("crash_and_reopen needs a directory library");
        };
        damage(dir.path());
        let db = Database::open_with_config(dir.path(), config.clone())?;
        let library = Library::new(Arc::new(db), indexer.clone());
        Ok(Self {
            library,
            indexer,
            storage,
            config,
        })
    }

    /// The directory, for file-based libraries.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.storage {
            Storage::Dir(dir) => Some(dir.path().to_path_buf()),
            Storage::Memory(_) => None,
        }
    }

    /// The recording search indexer.
    pub fn indexer(&self) -> &RecordingSearchIndexer {
        &self.indexer
    }

    /// Waits for queued search work to finish.
    pub fn settle(&self) {
        assert!(
            self.library.search_queue().wait_idle(Duration::from_secs(10)),
            "search queue did not drain"
        );
    }
}

impl std::ops::Deref for TestLibrary {
    type Target = Library;

    fn deref(&self) -> &Self::Target {
        &self.library
    }
}

/// Runs a test with a temporary in-memory library.
pub fn with_temp_library<F, R>(f: F) -> R
where
    F: FnOnce(&Library) -> R,
{
    let lib = TestLibrary::memory();
    f(&lib)
}

/// Seeded scenarios.
pub mod scenarios {
    use bindery_core::{Book, BookContributor, Contributor, ContributorRole, EntityId, Library};

    /// Stephen King, and Richard Bachman credited on one book.
    pub struct PenName {
        /// "Stephen King".
        pub king: Contributor,
        /// "Richard Bachman".
        pub bachman: Contributor,
        /// A book credited to Bachman.
        pub book: Book,
    }

    /// Seeds [`PenName`].
    pub fn pen_name(library: &Library) -> PenName {
        let king = library
            .contributors()
            .create(Contributor::new("Stephen King"))
            .expect("create king");
        let bachman = library
            .contributors()
            .create(Contributor::new("Richard Bachman"))
            .expect("create bachman");
        let book = library
            .books()
            .create(
                Book::new("The Running Man")
                    .with_contributor(BookContributor::new(bachman.id.clone(), ContributorRole::Author)),
            )
            .expect("create book");
        PenName { king, bachman, book }
    }

    /// Creates `count` contributors with IDs `c000`, `c001`, ...
    pub fn numbered_contributors(library: &Library, count: usize) -> Vec<Contributor> {
        (0..count)
            .map(|n| {
                let id = EntityId::parse(format!("c{n:03}")).expect("valid id");
                library
                    .contributors()
                    .create(Contributor::with_id(id, &format!("Contributor {n}")))
                    .expect("create contributor")
            })
            .collect()
    }
}
