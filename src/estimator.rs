//! Completion estimate for a directory subtree
//!
//! Only the immediate contents of the current directory are counted. All
//! direct files together weigh as much as one subdirectory's whole subtree,
//! so an update costs O(depth) instead of a pre-scan of the tree.

/// Percent range `[start, end]` assigned to a directory subtree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressWindow {
    pub start: f64,
    pub end: f64,
}

impl ProgressWindow {
    /// The window of a whole volume
    pub const FULL: ProgressWindow = ProgressWindow {
        start: 0.0,
        end: 100.0,
    };

    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// Turns processed file / subdirectory counts into a percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressEstimator {
    file_count: usize,
    subdir_count: usize,
}

impl ProgressEstimator {
    pub fn new(file_count: usize, subdir_count: usize) -> Self {
        Self {
            file_count,
            subdir_count,
        }
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn subdir_count(&self) -> usize {
        self.subdir_count
    }

    /// Weight of one subdirectory: `max(file_count, 1)`
    pub fn subdir_weight(&self) -> u64 {
        self.file_count.max(1) as u64
    }

    /// Weight of the local files, in units of one subdirectory
    pub fn file_weight(&self) -> u64 {
        if self.file_count > 0 {
            1
        } else {
            0
        }
    }

    /// Percent complete within `window`
    pub fn percent(
        &self,
        window: ProgressWindow,
        processed_subdirs: usize,
        processed_files: usize,
    ) -> f64 {
        let subdir_weight = self.subdir_weight();
        let total = subdir_weight * (self.subdir_count as u64 + self.file_weight());
        if total == 0 {
            return window.end;
        }

        let processed_subdirs = processed_subdirs.min(self.subdir_count) as u64;
        let processed_files = processed_files.min(self.file_count) as u64;
        let done = processed_subdirs * subdir_weight + processed_files;

        let percent =
            window.start + (window.end - window.start) * done as f64 / total as f64;
        percent.clamp(window.start, window.end)
    }

    /// Window handed to the subdirectory at `index`, after all local files
    pub fn subdir_window(&self, window: ProgressWindow, index: usize) -> ProgressWindow {
        ProgressWindow {
            start: self.percent(window, index, self.file_count),
            end: self.percent(window, index + 1, self.file_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_weights() {
        let est = ProgressEstimator::new(0, 3);
        assert_eq!(est.subdir_weight(), 1);
        assert_eq!(est.file_weight(), 0);

        let est = ProgressEstimator::new(8, 2);
        assert_eq!(est.subdir_weight(), 8);
        assert_eq!(est.file_weight(), 1);
    }

    #[test]
    fn test_files_and_subdirs_split_evenly() {
        // 4 files, 1 subdir: files take the first half, the subdir the second
        let est = ProgressEstimator::new(4, 1);
        assert_eq!(est.percent(ProgressWindow::FULL, 0, 0), 0.0);
        assert_eq!(est.percent(ProgressWindow::FULL, 0, 2), 25.0);
        assert_eq!(est.percent(ProgressWindow::FULL, 0, 4), 50.0);
        assert_eq!(est.percent(ProgressWindow::FULL, 1, 4), 100.0);

        let sub = est.subdir_window(ProgressWindow::FULL, 0);
        assert_eq!(sub, ProgressWindow::new(50.0, 100.0));
    }

    #[test]
    fn test_empty_directory_is_complete() {
        let est = ProgressEstimator::new(0, 0);
        let window = ProgressWindow::new(20.0, 40.0);
        assert_eq!(est.percent(window, 0, 0), 40.0);
    }

    #[test]
    fn test_only_subdirs() {
        let est = ProgressEstimator::new(0, 4);
        let window = ProgressWindow::new(0.0, 40.0);
        assert_eq!(est.percent(window, 1, 0), 10.0);
        assert_eq!(est.subdir_window(window, 2), ProgressWindow::new(20.0, 30.0));
    }

    proptest! {
        #[test]
        fn prop_percent_stays_in_window(
            files in 0usize..50,
            subdirs in 0usize..20,
            start in 0.0f64..50.0,
            width in 0.0f64..50.0,
            done_files in 0usize..60,
            done_subdirs in 0usize..25,
        ) {
            let est = ProgressEstimator::new(files, subdirs);
            let window = ProgressWindow::new(start, start + width);
            let p = est.percent(window, done_subdirs, done_files);
            prop_assert!(p >= window.start && p <= window.end);
        }

        #[test]
        fn prop_percent_is_monotone(
            files in 0usize..50,
            subdirs in 0usize..20,
        ) {
            let est = ProgressEstimator::new(files, subdirs);
            let mut last = 0.0;
            for f in 0..=files {
                let p = est.percent(ProgressWindow::FULL, 0, f);
                prop_assert!(p >= last);
                last = p;
            }
            for s in 1..=subdirs {
                let p = est.percent(ProgressWindow::FULL, s, files);
                prop_assert!(p >= last);
                last = p;
            }
            prop_assert_eq!(last, 100.0);
        }

        #[test]
        fn prop_subdir_windows_tile_the_tail(
            files in 0usize..50,
            subdirs in 1usize..20,
        ) {
            let est = ProgressEstimator::new(files, subdirs);
            let first = est.subdir_window(ProgressWindow::FULL, 0);
            prop_assert_eq!(first.start, est.percent(ProgressWindow::FULL, 0, files));
            for i in 1..subdirs {
                let prev = est.subdir_window(ProgressWindow::FULL, i - 1);
                let next = est.subdir_window(ProgressWindow::FULL, i);
                prop_assert_eq!(prev.end, next.start);
            }
            prop_assert_eq!(est.subdir_window(ProgressWindow::FULL, subdirs - 1).end, 100.0);
        }
    }
}
