//! Paginated File List Controller
//!
//! Owns the flat file list of the directory currently shown. Pages are
//! fetched one at a time; a fetch started for an earlier directory (or
//! before a reload) is discarded when it lands.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ExplorerError;
use crate::gateway::ObjectMeta;
use crate::listing::{merge_files, ListingClient};
use crate::paths;

/// Files of one directory, in arrival order with unique keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginatedFileList {
    /// Canonical directory id; empty until a directory is set
    pub directory: String,
    pub items: Vec<ObjectMeta>,
    /// Next page to request
    pub next_page: u32,
    pub exhausted: bool,
}

impl PaginatedFileList {
    fn for_directory(directory: String) -> Self {
        Self {
            directory,
            ..Default::default()
        }
    }

    pub fn last_key(&self) -> Option<&str> {
        self.items.last().map(|m| m.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Result of a page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A page was merged
    Appended { added: usize, exhausted: bool },
    /// The directory was already current and loaded
    Unchanged,
    /// The last page was already merged; nothing was sent
    Exhausted,
    /// A page fetch is already running; nothing was sent
    InFlight,
    /// The visible item is not the last one; nothing was sent
    NotLast,
    /// The response belonged to a directory that is no longer shown
    Stale,
}

struct ListState {
    list: PaginatedFileList,
    /// Bumped on every reset; a response is applied only to its own generation
    generation: u64,
    in_flight: Option<u64>,
}

/// Clears the in-flight marker if the fetch future is dropped mid-request
struct InFlightGuard<'a> {
    state: &'a Mutex<ListState>,
    generation: u64,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.in_flight == Some(self.generation) {
                state.in_flight = None;
            }
        }
    }
}

pub struct FileListController {
    listing: ListingClient,
    state: Mutex<ListState>,
}

impl FileListController {
    pub fn new(listing: ListingClient) -> Self {
        Self {
            listing,
            state: Mutex::new(ListState {
                list: PaginatedFileList::default(),
                generation: 0,
                in_flight: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current list for rendering
    pub fn snapshot(&self) -> PaginatedFileList {
        self.state().list.clone()
    }

    pub fn directory(&self) -> String {
        self.state().list.directory.clone()
    }

    pub fn page_size(&self) -> u32 {
        self.listing.page_size()
    }

    /// Show `path`. A different directory clears the list and fetches page 0;
    /// the current one is left alone unless its first page never arrived.
    pub async fn set_directory(&self, path: &str) -> Result<FetchOutcome, ExplorerError> {
        let directory = paths::normalize_directory(path);
        let needs_first_page = {
            let state = self.state();
            state.list.directory != directory
                || (state.list.next_page == 0 && !state.list.exhausted && state.in_flight.is_none())
        };
        if !needs_first_page {
            return Ok(FetchOutcome::Unchanged);
        }

        self.reset_to(&directory);
        self.fetch_next_page().await
    }

    /// Clear the list and point it at `path` without fetching
    pub fn reset_to(&self, path: &str) {
        let directory = paths::normalize_directory(path);
        let mut state = self.state();
        state.generation += 1;
        state.in_flight = None;
        debug!("[FileList] Reset to {} (generation {})", directory, state.generation);
        state.list = PaginatedFileList::for_directory(directory);
    }

    /// Drop everything and fetch the current directory from page 0
    pub async fn reload(&self) -> Result<FetchOutcome, ExplorerError> {
        let directory = self.directory();
        if directory.is_empty() {
            return Ok(FetchOutcome::Unchanged);
        }
        info!("[FileList] Reloading {}", directory);
        self.reset_to(&directory);
        self.fetch_next_page().await
    }

    /// Fetch the next page of the current directory.
    ///
    /// No-op when the list is exhausted or a fetch is already running, so
    /// page N+1 is never requested before page N was applied.
    pub async fn fetch_next_page(&self) -> Result<FetchOutcome, ExplorerError> {
        let (directory, page, generation) = {
            let mut state = self.state();
            if state.list.directory.is_empty() {
                return Ok(FetchOutcome::Unchanged);
            }
            if state.list.exhausted {
                return Ok(FetchOutcome::Exhausted);
            }
            if state.in_flight.is_some() {
                return Ok(FetchOutcome::InFlight);
            }
            state.in_flight = Some(state.generation);
            (state.list.directory.clone(), state.list.next_page, state.generation)
        };

        let mut guard = InFlightGuard {
            state: &self.state,
            generation,
            armed: true,
        };

        debug!("[FileList] Fetching {} page {}", directory, page);
        let result = self.listing.list_page(&directory, page).await;

        let mut state = self.state();
        guard.armed = false;
        if state.generation != generation {
            debug!(
                "[FileList] Discarding page {} of {} (now showing {})",
                page, directory, state.list.directory
            );
            return Ok(FetchOutcome::Stale);
        }
        state.in_flight = None;

        let listed = result.map_err(|e| {
            warn!("[FileList] {} page {} failed: {}", directory, page, e);
            ExplorerError::Listing(e)
        })?;

        let added = merge_files(&mut state.list.items, listed.listing.files);
        state.list.next_page = state.list.next_page.max(page + 1);
        state.list.exhausted = listed.is_last;

        debug!(
            "[FileList] {} page {}: +{} items ({} total){}",
            directory,
            page,
            added,
            state.list.items.len(),
            if listed.is_last { ", exhausted" } else { "" }
        );
        Ok(FetchOutcome::Appended {
            added,
            exhausted: listed.is_last,
        })
    }

    /// Intersection signal: `key` became visible. Fetches the next page when
    /// it is the last item of the list.
    pub async fn on_item_visible(&self, key: &str) -> Result<FetchOutcome, ExplorerError> {
        let is_last = self.state().list.last_key() == Some(key);
        if !is_last {
            return Ok(FetchOutcome::NotLast);
        }
        self.fetch_next_page().await
    }

    /// Keep fetching while the last item is visible.
    ///
    /// `last_item_visible` is re-evaluated against the new list after every
    /// appended page. Returns the number of pages appended.
    pub async fn fill_viewport<F>(&self, mut last_item_visible: F) -> Result<usize, ExplorerError>
    where
        F: FnMut(&PaginatedFileList) -> bool,
    {
        let mut pages = 0;
        loop {
            let list = self.snapshot();
            if list.exhausted || !last_item_visible(&list) {
                return Ok(pages);
            }
            match self.fetch_next_page().await? {
                FetchOutcome::Appended { .. } => pages += 1,
                _ => return Ok(pages),
            }
        }
    }

    /// Follow the directory derived from the tree selection until the sender
    /// goes away. A change while a page is loading abandons that page.
    pub async fn follow(self: Arc<Self>, mut directories: watch::Receiver<String>) {
        loop {
            let directory = directories.borrow_and_update().clone();
            tokio::select! {
                result = self.set_directory(&directory) => {
                    if let Err(e) = result {
                        warn!("[FileList] Loading {} failed: {}", directory, e);
                    }
                    if directories.changed().await.is_err() {
                        break;
                    }
                }
                changed = directories.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("[FileList] Directory feed closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{Op, ScriptedGateway};
    use crate::gateway::StorageError;

    fn controller(gateway: &Arc<ScriptedGateway>) -> Arc<FileListController> {
        Arc::new(FileListController::new(ListingClient::new(gateway.clone(), 10)))
    }

    fn keys(list: &PaginatedFileList) -> Vec<String> {
        list.items.iter().map(|m| m.key.clone()).collect()
    }

    #[tokio::test]
    async fn test_pagination_until_exhausted() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fill("a/", 23);
        let files = controller(&gateway);

        assert_eq!(
            files.set_directory("/a").await.unwrap(),
            FetchOutcome::Appended { added: 10, exhausted: false }
        );
        assert_eq!(
            files.fetch_next_page().await.unwrap(),
            FetchOutcome::Appended { added: 10, exhausted: false }
        );
        assert_eq!(
            files.fetch_next_page().await.unwrap(),
            FetchOutcome::Appended { added: 3, exhausted: true }
        );

        let list = files.snapshot();
        assert_eq!(list.items.len(), 23);
        assert!(list.exhausted);
        assert_eq!(list.next_page, 3);
        assert_eq!(gateway.count(Op::List), 3);

        assert_eq!(files.fetch_next_page().await.unwrap(), FetchOutcome::Exhausted);
        assert_eq!(gateway.count(Op::List), 3);
        assert_eq!(files.snapshot(), list);
    }

    #[tokio::test]
    async fn test_empty_directory_is_exhausted_after_first_fetch() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.put_marker("empty/");
        let files = controller(&gateway);

        files.set_directory("empty/").await.unwrap();
        let list = files.snapshot();
        assert!(list.items.is_empty());
        assert!(list.exhausted);
    }

    #[tokio::test]
    async fn test_directory_switch_resets_list() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fill("a/", 15);
        gateway.fill("b/", 2);
        let files = controller(&gateway);

        files.set_directory("/a").await.unwrap();
        files.fetch_next_page().await.unwrap();
        assert_eq!(files.snapshot().len(), 15);

        files.set_directory("/b").await.unwrap();
        assert_eq!(keys(&files.snapshot()), vec!["b/file-00.txt", "b/file-01.txt"]);

        let gate = gateway.gate_listing("a/", 0);
        let pending = {
            let files = files.clone();
            tokio::spawn(async move { files.set_directory("/a").await })
        };
        gateway.wait_for_calls(Op::List, 4).await;
        let between = files.snapshot();
        assert_eq!(between.directory, "a/");
        assert!(between.items.is_empty());
        assert_eq!(between.next_page, 0);

        gate.release();
        pending.await.unwrap().unwrap();
        let list = files.snapshot();
        assert_eq!(list.items.len(), 10);
        assert_eq!(list.next_page, 1);
        assert_eq!(
            gateway.list_calls(),
            vec![
                ("a/".to_string(), 0),
                ("a/".to_string(), 1),
                ("b/".to_string(), 0),
                ("a/".to_string(), 0)
            ]
        );
    }

    #[tokio::test]
    async fn test_same_directory_is_unchanged() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fill("a/", 3);
        let files = controller(&gateway);

        files.set_directory("a/").await.unwrap();
        assert_eq!(files.set_directory("/a/").await.unwrap(), FetchOutcome::Unchanged);
        assert_eq!(gateway.count(Op::List), 1);
    }

    #[tokio::test]
    async fn test_stale_page_discarded_after_switch() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fill("a/", 3);
        gateway.fill("b/", 1);
        let files = controller(&gateway);

        let gate = gateway.gate_listing("a/", 0);
        let pending = {
            let files = files.clone();
            tokio::spawn(async move { files.set_directory("a/").await })
        };
        gateway.wait_for_calls(Op::List, 1).await;

        files.set_directory("b/").await.unwrap();
        gate.release();

        assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Stale);
        let list = files.snapshot();
        assert_eq!(list.directory, "b/");
        assert_eq!(keys(&list), vec!["b/file-00.txt"]);
    }

    #[tokio::test]
    async fn test_one_page_fetch_at_a_time() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fill("a/", 25);
        let files = controller(&gateway);
        files.set_directory("a/").await.unwrap();

        let gate = gateway.gate_listing("a/", 1);
        let pending = {
            let files = files.clone();
            tokio::spawn(async move { files.fetch_next_page().await })
        };
        gateway.wait_for_calls(Op::List, 2).await;

        assert_eq!(files.fetch_next_page().await.unwrap(), FetchOutcome::InFlight);
        gate.release();
        pending.await.unwrap().unwrap();

        files.fetch_next_page().await.unwrap();
        assert_eq!(
            gateway.list_calls().iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(files.snapshot().len(), 25);
    }

    #[tokio::test]
    async fn test_failed_page_keeps_items_and_page_counter() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fill("a/", 12);
        let files = controller(&gateway);
        files.set_directory("a/").await.unwrap();

        gateway.fail_next(Op::List, StorageError::Timeout);
        assert!(matches!(files.fetch_next_page().await, Err(ExplorerError::Listing(_))));
        let list = files.snapshot();
        assert_eq!(list.len(), 10);
        assert_eq!(list.next_page, 1);

        // the next attempt retries the same page
        files.fetch_next_page().await.unwrap();
        assert_eq!(files.snapshot().len(), 12);
    }

    #[tokio::test]
    async fn test_reload_replaces_changed_objects() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.put("a/x.txt", 1);
        let files = controller(&gateway);
        files.set_directory("a/").await.unwrap();

        gateway.put("a/x.txt", 50);
        gateway.put("a/y.txt", 1);
        files.reload().await.unwrap();

        let list = files.snapshot();
        assert_eq!(keys(&list), vec!["a/x.txt", "a/y.txt"]);
        assert_eq!(list.items[0].size, 50);
    }

    #[tokio::test]
    async fn test_visibility_triggers_only_on_last_item() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fill("a/", 30);
        let files = controller(&gateway);
        files.set_directory("a/").await.unwrap();

        assert_eq!(files.on_item_visible("a/file-03.txt").await.unwrap(), FetchOutcome::NotLast);
        assert!(matches!(
            files.on_item_visible("a/file-09.txt").await.unwrap(),
            FetchOutcome::Appended { added: 10, .. }
        ));
        assert_eq!(gateway.count(Op::List), 2);
    }

    #[tokio::test]
    async fn test_fill_viewport_is_level_triggered() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fill("a/", 45);
        let files = controller(&gateway);
        files.set_directory("a/").await.unwrap();

        // a viewport tall enough for 25 rows keeps paging until it overflows
        let pages = files.fill_viewport(|list| list.len() < 25).await.unwrap();
        assert_eq!(pages, 2);
        assert_eq!(files.snapshot().len(), 30);

        // an unbounded viewport drains the directory
        let pages = files.fill_viewport(|_| true).await.unwrap();
        assert_eq!(pages, 2);
        assert!(files.snapshot().exhausted);
        assert_eq!(files.snapshot().len(), 45);
    }

    #[tokio::test]
    async fn test_follow_tracks_directory_changes() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fill("a/", 2);
        gateway.fill("b/", 3);
        let files = controller(&gateway);

        let (tx, rx) = watch::channel("a/".to_string());
        let follower = tokio::spawn(files.clone().follow(rx));
        gateway.wait_for_calls(Op::List, 1).await;
        for _ in 0..100 {
            if files.snapshot().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(files.snapshot().len(), 2);

        tx.send("b/".to_string()).unwrap();
        gateway.wait_for_calls(Op::List, 2).await;
        for _ in 0..100 {
            if files.snapshot().len() == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(files.directory(), "b/");
        assert_eq!(files.snapshot().len(), 3);

        drop(tx);
        follower.await.unwrap();
    }
}
