//! Plan rendering.

use crate::diffable::Resource;
use crate::ui::Ui;

use super::Change;

/// Write a plan for `changes`. Returns false if there was nothing to show.
pub fn write_plan(ui: &mut dyn Ui, changes: &[Change]) -> bool {
  if changes.is_empty() {
    return false;
  }
  let verbose = ui.is_verbose();
  for change in changes {
    write_change(ui, change, 0, verbose);
  }
  true
}

fn write_change(ui: &mut dyn Ui, change: &Change, depth: usize, verbose: bool) {
  let indent = "    ".repeat(depth);
  match change {
    Change::Create { pending, nested } => {
      ui.write(&format!("{}+ Create {}", indent, pending.key));
      if verbose {
        write_fields(ui, pending, &indent);
      }
      for child in nested {
        write_change(ui, child, depth + 1, verbose);
      }
    }
    Change::Update {
      current,
      pending,
      changed,
      nested,
    }
    | Change::Replace {
      current,
      pending,
      changed,
      nested,
    } => {
      let (symbol, verb) = if matches!(change, Change::Update { .. }) {
        ("*", "Update")
      } else {
        ("~", "Replace")
      };
      ui.write(&format!("{}{} {} {} ({})", indent, symbol, verb, pending.key, join(changed)));
      for field in changed {
        if !(pending.subresources.contains_key(field) || current.subresources.contains_key(field)) {
          ui.write(&format!(
            "{}    · {}: {} -> {}",
            indent,
            field,
            current.get(field).render(),
            pending.get(field).render()
          ));
        }
      }
      for child in nested {
        write_change(ui, child, depth + 1, verbose);
      }
    }
    Change::Delete { current, nested } => {
      ui.write(&format!("{}- Delete {}", indent, current.key));
      for child in nested {
        write_change(ui, child, depth + 1, verbose);
      }
    }
  }
}

fn write_fields(ui: &mut dyn Ui, resource: &Resource, indent: &str) {
  for (name, value) in &resource.fields {
    ui.write(&format!("{}    · {}: {}", indent, name, value.render()));
  }
}

fn join(fields: &std::collections::BTreeSet<String>) -> String {
  fields.iter().cloned().collect::<Vec<_>>().join(", ")
}
