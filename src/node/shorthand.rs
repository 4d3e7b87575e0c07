//! Shorthand permission expansion.
//!
//! A permission segment may declare alternatives: `chat.{color,format}`
//! expands to `chat.color` and `chat.format`, and the `(a|b)` form does the
//! same. Alternation segments combine as a cartesian product across the
//! string. Strings without alternation expand to nothing.

/// Expand a shorthand permission into its concrete forms.
pub fn expand(permission: &str) -> Vec<String> {
    if !permission.contains('{') && !permission.contains('(') {
        return Vec::new();
    }

    let mut products: Vec<String> = vec![String::new()];
    let mut any_alternation = false;

    for (index, segment) in permission.split('.').enumerate() {
        let options: Vec<&str> = if let Some(inner) = delimited(segment, '{', '}') {
            any_alternation = true;
            inner.split(',').collect()
        } else if let Some(inner) = delimited(segment, '(', ')') {
            any_alternation = true;
            inner.split('|').collect()
        } else {
            vec![segment]
        };

        let mut next = Vec::with_capacity(products.len() * options.len());
        for product in &products {
            for option in &options {
                let mut expanded = product.clone();
                if index > 0 {
                    expanded.push('.');
                }
                expanded.push_str(option);
                next.push(expanded);
            }
        }
        products = next;
    }

    if !any_alternation {
        return Vec::new();
    }
    products
}

fn delimited(segment: &str, open: char, close: char) -> Option<&str> {
    let rest = segment.strip_prefix(open)?;
    let inner = rest.strip_suffix(close)?;
    if inner.is_empty() { None } else { Some(inner) }
}
