pub fn apply_pattern_string(pattern: &str, vars: &[(&str, &str)]) -> String {
    let mut result = pattern.to_string();
    for (key, value) in vars {
        let needle = format!(":{}", key);
        result = result.replace(&needle, value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_pattern_string() {
        let vars = [("id", "80351110224678912"), ("avatar", "8342729096ea3675442027381ff50dfe")];
        assert_eq!(
            apply_pattern_string("https://cdn.discordapp.com/avatars/:id/:avatar.png", &vars),
            "https://cdn.discordapp.com/avatars/80351110224678912/8342729096ea3675442027381ff50dfe.png"
        );

        assert_eq!(apply_pattern_string("user:n", &[("n", "7")]), "user7");
        assert_eq!(apply_pattern_string("[anon] :n", &[("n", "12")]), "[anon] 12");
    }
}
