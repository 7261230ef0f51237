use std::path::{Component, Path, PathBuf};

/// Resolves `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// True when `candidate` is `base` or lies beneath it, compared per component.
pub fn is_sub_path(base: &Path, candidate: &Path) -> bool {
    let base = normalize_lexically(base);
    let candidate = normalize_lexically(candidate);
    if base.as_os_str().is_empty() {
        return false;
    }

    let mut remaining = candidate.components();
    base.components().all(|expected| {
        remaining
            .next()
            .is_some_and(|actual| components_match(expected, actual))
    })
}

pub fn same_location(left: &Path, right: &Path) -> bool {
    let left = normalize_lexically(left);
    let right = normalize_lexically(right);
    left.components().count() == right.components().count()
        && left
            .components()
            .zip(right.components())
            .all(|(a, b)| components_match(a, b))
}

/// Re-roots `path` from `old_base` onto `new_base`. `None` if `path` is not
/// under `old_base`.
pub fn rebase(path: &Path, old_base: &Path, new_base: &Path) -> Option<PathBuf> {
    if !is_sub_path(old_base, path) {
        return None;
    }

    let depth = normalize_lexically(old_base).components().count();
    let remainder: PathBuf = normalize_lexically(path).components().skip(depth).collect();
    if remainder.as_os_str().is_empty() {
        Some(new_base.to_path_buf())
    } else {
        Some(new_base.join(remainder))
    }
}

fn components_match(left: Component<'_>, right: Component<'_>) -> bool {
    if cfg!(windows) {
        left.as_os_str()
            .to_string_lossy()
            .eq_ignore_ascii_case(&right.as_os_str().to_string_lossy())
    } else {
        left == right
    }
}
