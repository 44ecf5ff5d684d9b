use std::{
    fs,
    path::{Path, PathBuf},
};

pub fn walk_recursive<F>(
    folder: &PathBuf,
    filter_fn: Option<F>,
) -> Result<Vec<PathBuf>, std::io::Error>
where
    F: Fn(&PathBuf) -> bool + Copy,
{
    let mut local_paths = Vec::new();
    let dir = fs::read_dir(folder)?;
    for file in dir {
        let path = file?.path();
        if path.is_file() {
            if let Some(filter_fn) = filter_fn {
                if filter_fn(&path) {
                    local_paths.push(path);
                }
            } else {
                local_paths.push(path);
            }
        } else if path.is_dir() {
            local_paths.append(walk_recursive(&path.to_path_buf(), filter_fn)?.as_mut());
        }
    }
    Ok(local_paths)
}

/// Library paths must never contain forward slashes from titles.
pub fn sanitize_title(title: &str) -> String {
    title.replace('/', "-")
}

/// `{imdb-tt0133093}` marker used in library folder names.
pub fn imdb_tag(imdb_id: &str) -> String {
    format!("{{imdb-{imdb_id}}}")
}

/// Extract the imdb id from a path segment carrying the `{imdb-ttXXXXXXX}`
/// marker.
pub fn imdb_from_segment(segment: &str) -> Option<String> {
    let start = segment.find("{imdb-")? + "{imdb-".len();
    let rest = &segment[start..];
    let end = rest.find('}')?;
    let id = &rest[..end];
    if id.starts_with("tt") && id.len() > 2 && id[2..].chars().all(|c| c.is_ascii_digit()) {
        Some(id.to_string())
    } else {
        None
    }
}

/// Parse the `sNNeNN` marker out of a library file name.
pub fn season_episode_from_name(name: &str) -> Option<(i64, i64)> {
    let lower = name.to_lowercase();
    let bytes = lower.as_bytes();
    for (i, window) in bytes.windows(2).enumerate() {
        if window[0] != b's' || !window[1].is_ascii_digit() {
            continue;
        }
        let digits_end = lower[i + 1..]
            .find(|c: char| !c.is_ascii_digit())
            .map(|offset| i + 1 + offset)?;
        if !lower[digits_end..].starts_with('e') {
            continue;
        }
        let ep_start = digits_end + 1;
        let ep_end = lower[ep_start..]
            .find(|c: char| !c.is_ascii_digit())
            .map_or(lower.len(), |offset| ep_start + offset);
        if ep_end == ep_start {
            continue;
        }
        let season = lower[i + 1..digits_end].parse().ok()?;
        let episode = lower[ep_start..ep_end].parse().ok()?;
        return Some((season, episode));
    }
    None
}

pub fn file_extension(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|ext| ext.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imdb_segment_roundtrip() {
        let segment = format!("The Matrix (1999) {}", imdb_tag("tt0133093"));
        assert_eq!(imdb_from_segment(&segment).as_deref(), Some("tt0133093"));
        assert_eq!(imdb_from_segment("The Matrix (1999)"), None);
        assert_eq!(imdb_from_segment("{imdb-garbage}"), None);
    }

    #[test]
    fn season_episode_markers() {
        let tests = [
            ("Foo (2020) - s02e03 - title.mkv", Some((2, 3))),
            ("Foo (2020) - s02e03-e05 - title.mkv", Some((2, 3))),
            ("Foo.S01E10.mkv", Some((1, 10))),
            ("Foo (2020) {imdb-tt0000001}.mkv", None),
        ];
        for (name, expected) in tests {
            assert_eq!(season_episode_from_name(name), expected, "{name}");
        }
    }
}
