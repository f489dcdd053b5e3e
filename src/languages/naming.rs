//! File naming conventions for entry programs

/// `mario-less` -> `MarioLess`, `fizz_buzz` -> `FizzBuzz`
pub fn pascal_case(name: &str) -> String {
    name.split(['-', '_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect()
}

/// Strip a trailing `.ext` from an entry file name
pub fn file_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("hello"), "Hello");
        assert_eq!(pascal_case("mario-less"), "MarioLess");
        assert_eq!(pascal_case("fizz_buzz"), "FizzBuzz");
        assert_eq!(pascal_case("CREDIT"), "Credit");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("hello.c"), "hello");
        assert_eq!(file_stem("Hello.java"), "Hello");
        assert_eq!(file_stem("Makefile"), "Makefile");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }
}
