use crate::config::Settings;
use crate::diffable::TypeRegistry;
use crate::ui::Ui;

/// Everything an operation needs from its surroundings, passed explicitly
/// through planning, execution and workflows.
pub struct Context<'a> {
  pub ui: &'a mut dyn Ui,
  pub registry: &'a TypeRegistry,
  pub settings: &'a Settings,
}

impl<'a> Context<'a> {
  pub fn new(ui: &'a mut dyn Ui, registry: &'a TypeRegistry, settings: &'a Settings) -> Self {
    Self { ui, registry, settings }
  }

  /// A shorter-lived context over the same parts.
  pub fn reborrow(&mut self) -> Context<'_> {
    Context {
      ui: &mut *self.ui,
      registry: self.registry,
      settings: self.settings,
    }
  }
}
