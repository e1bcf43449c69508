use std::fs;
use std::path::{Path, PathBuf};

fn collect_rs_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if let Ok(read_dir) = fs::read_dir(&dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().map(|e| e == "rs").unwrap_or(false) {
                    files.push(path);
                }
            }
        }
    }
    files
}

const EDGE_MUTATIONS: &[&str] = &[
    ".following.insert(",
    ".following.remove(",
    ".followers.insert(",
    ".followers.remove(",
];

#[test]
fn edge_lists_are_mutated_only_by_edge_owners() {
    let src = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src");

    let allowed = [
        // toggle writes actor side then target side
        "src/services/follow.rs",
        // cascade detaches neighbours
        "src/services/account_deletion.rs",
        // repair pass
        "src/services/reconciliation.rs",
        // worker test seeds a one-sided edge
        "src/workers/reconciliation.rs",
    ];

    let mut offenders = Vec::new();
    for file in collect_rs_files(&src) {
        let path_str = file.to_string_lossy().replace('\\', "/");
        if allowed.iter().any(|a| path_str.ends_with(a)) {
            continue;
        }
        let Ok(contents) = fs::read_to_string(&file) else {
            continue;
        };
        if EDGE_MUTATIONS.iter().any(|needle| contents.contains(needle)) {
            offenders.push(path_str);
        }
    }

    assert!(
        offenders.is_empty(),
        "follow edges mutated outside the edge-owning services: {:?}",
        offenders
    );
}
