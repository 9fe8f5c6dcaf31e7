/// Reports whether a message published with the given routing key reaches a
/// queue bound with the given binding key, under AMQP topic exchange rules.
///
/// Both keys are lists of words delimited by dots. In the binding key, `*`
/// stands for exactly one word and `#` for zero or more words.
///
/// ```
/// use yosun::topic_matches;
///
/// assert!(topic_matches("orders.*.created", "orders.eu.created"));
/// assert!(topic_matches("orders.#", "orders"));
/// assert!(!topic_matches("orders.*", "orders.eu.created"));
/// ```
pub fn topic_matches(binding_key: &str, routing_key: &str) -> bool {
    let pattern = binding_key.split('.').collect::<Vec<_>>();
    let words = routing_key.split('.').collect::<Vec<_>>();

    match_words(&pattern, &words)
}

fn match_words(pattern: &[&str], words: &[&str]) -> bool {
    // reachable[j]: the segments seen so far consume exactly the first j words
    let mut reachable = vec![false; words.len() + 1];
    reachable[0] = true;

    for segment in pattern {
        let mut next = vec![false; words.len() + 1];

        match *segment {
            "#" => {
                let mut any = false;
                for (j, slot) in next.iter_mut().enumerate() {
                    any |= reachable[j];
                    *slot = any;
                }
            }
            "*" => {
                for j in 1..=words.len() {
                    next[j] = reachable[j - 1];
                }
            }
            word => {
                for j in 1..=words.len() {
                    next[j] = reachable[j - 1] && words[j - 1] == word;
                }
            }
        }

        reachable = next;
    }

    reachable[words.len()]
}

/// Prepends the key prefix to a binding or routing key.
pub(crate) fn prefixed(prefix: &str, key: &str) -> String {
    let mut full = String::with_capacity(prefix.len() + key.len());
    full.push_str(prefix);
    full.push_str(key);

    full
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_words() {
        assert!(topic_matches("a.b.c", "a.b.c"));
        assert!(!topic_matches("a.b.c", "a.b"));
        assert!(!topic_matches("a.b", "a.b.c"));
        assert!(!topic_matches("a.b.c", "a.x.c"));
    }

    #[test]
    fn star_is_one_word() {
        assert!(topic_matches("a.*.c", "a.b.c"));
        assert!(topic_matches("*", "a"));
        assert!(!topic_matches("a.*", "a"));
        assert!(!topic_matches("a.*", "a.b.c"));
    }

    #[test]
    fn hash_is_any_number_of_words() {
        assert!(topic_matches("#", "a.b.c"));
        assert!(topic_matches("a.#", "a"));
        assert!(topic_matches("a.#", "a.b.c"));
        assert!(topic_matches("a.#.z", "a.z"));
        assert!(topic_matches("a.#.z", "a.b.c.z"));
        assert!(!topic_matches("a.#.z", "a.b.c"));
        assert!(topic_matches("#.c", "a.b.c"));
    }

    #[test]
    fn many_hashes_stay_fast() {
        let pattern = format!("{}z", "#.".repeat(30));
        let miss = vec!["a"; 40].join(".");
        let hit = format!("{miss}.z");

        assert!(!topic_matches(&pattern, &miss));
        assert!(topic_matches(&pattern, &hit));
    }

    #[test]
    fn prefix_is_prepended() {
        assert_eq!(prefixed("dev.", "orders.created"), "dev.orders.created");
        assert_eq!(prefixed("", "orders"), "orders");
    }
}
