//! Small accessors over KDL nodes.
//!
//! Configuration values live as child nodes with positional arguments, e.g.
//! `address "0.0.0.0:8080"`. These helpers look a child up by name and pull
//! its first argument out as the wanted type.

use kdl::{KdlNode, KdlValue};

/// Find a direct child node by name.
pub fn get_child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|n| n.name().value() == name)
}

/// First positional (unnamed) argument of a node.
fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

/// String value of the named child, e.g. `email "a@b.com"`.
pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    get_child(node, name)
        .and_then(first_arg)
        .and_then(|v| v.as_string())
        .map(str::to_string)
}

/// Integer value of the named child, e.g. `renew-before-days 30`.
pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i64> {
    get_child(node, name)
        .and_then(first_arg)
        .and_then(|v| v.as_integer())
        .map(|v| v as i64)
}

/// Boolean value of the named child, e.g. `enabled true`.
pub fn get_bool_entry(node: &KdlNode, name: &str) -> Option<bool> {
    get_child(node, name).and_then(first_arg).and_then(|v| v.as_bool())
}

/// All positional string arguments of the named child, e.g.
/// `domains "example.com" "www.example.com"`.
pub fn get_string_args(node: &KdlNode, name: &str) -> Vec<String> {
    match get_child(node, name) {
        Some(child) => child
            .entries()
            .iter()
            .filter(|e| e.name().is_none())
            .filter_map(|e| e.value().as_string())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}
