//! Helpers for the slash separated paths used to address nodes inside a
//! space. Paths are always interpreted relative to the space root.

/// Normalizes `p` into a rooted path without `.`, `..`, empty segments or a
/// trailing slash. `..` never climbs above the root.
pub fn clean(p: &str) -> String {
    path_clean::clean(&format!("/{}", p))
}

/// Splits a path into its cleaned parent directory and final segment.
/// The root splits into `("/", "")`.
pub fn split(p: &str) -> (String, String) {
    let p = clean(p);
    match p.rfind('/') {
        Some(0) => ("/".to_string(), p[1..].to_string()),
        Some(i) => (p[..i].to_string(), p[i + 1..].to_string()),
        None => ("/".to_string(), p),
    }
}

/// Joins a directory path and a child name, returning a cleaned path.
pub fn join(dir: &str, name: &str) -> String {
    clean(&format!("{}/{}", dir, name))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    #[test_case("", "/"; "empty")]
    #[test_case("/", "/"; "root")]
    #[test_case("foo", "/foo"; "relative")]
    #[test_case("/foo/", "/foo"; "trailing slash")]
    #[test_case("//foo//bar", "/foo/bar"; "duplicate separators")]
    #[test_case("/foo/./bar/..", "/foo"; "dots")]
    #[test_case("/../../foo", "/foo"; "above root")]
    fn clean(input: &str, expected: &str) {
        assert_eq!(expected, super::clean(input));
    }

    #[test_case("/", "/", ""; "root")]
    #[test_case("/foo", "/", "foo"; "top level")]
    #[test_case("/foo/bar/baz.txt", "/foo/bar", "baz.txt"; "nested")]
    #[test_case("foo/bar/", "/foo", "bar"; "uncleaned")]
    fn split(input: &str, dir: &str, name: &str) {
        assert_eq!((dir.to_string(), name.to_string()), super::split(input));
    }

    #[test]
    fn join() {
        assert_eq!("/foo/bar", super::join("/foo", "bar"));
        assert_eq!("/bar", super::join("/", "bar"));
    }
}
