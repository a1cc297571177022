//! Input slots - the read side of time-series edges
//!
//! An input is either *peered* (one structural binding to an output) or
//! *non-peered* (a composite synthesized from independently bound
//! sub-fields). Inputs hold non-owning references into the output arena;
//! the `active` flag decides whether the owning node is woken on
//! modification.

use std::sync::Arc;

use cascade_core::{ElementPath, OutputId, PathSeg, Shape};

/// Where one leaf of an input reads from.
#[derive(Clone, PartialEq, Debug)]
pub enum InputBinding {
    Unbound,
    /// Bound as a single structural reference to one output.
    Peer { output: OutputId, path: ElementPath },
    /// Non-peered bundle: sub-fields bound independently.
    Fields(Vec<(Arc<str>, InputBinding)>),
    /// Non-peered list: elements bound independently.
    Elements(Vec<InputBinding>),
}

impl InputBinding {
    /// Every bound leaf as `(output, path-into-output)`.
    pub fn leaves(&self) -> Vec<(OutputId, ElementPath)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<(OutputId, ElementPath)>) {
        match self {
            InputBinding::Unbound => {}
            InputBinding::Peer { output, path } => out.push((*output, path.clone())),
            InputBinding::Fields(fields) => {
                for (_, b) in fields {
                    b.collect_leaves(out);
                }
            }
            InputBinding::Elements(elements) => {
                for b in elements {
                    b.collect_leaves(out);
                }
            }
        }
    }

    /// Navigate (creating composite layers as needed) to the sub-binding at
    /// `slot` and return it mutably. `shape` is the input's declared shape,
    /// used to materialise the right composite layer.
    pub(crate) fn slot_mut(
        &mut self,
        shape: &Shape,
        slot: &ElementPath,
    ) -> Option<&mut InputBinding> {
        let mut binding = self;
        let mut shape = shape;
        for seg in slot.segments() {
            match (seg, shape) {
                (PathSeg::Field(name), Shape::Bundle(fields)) => {
                    if matches!(binding, InputBinding::Unbound | InputBinding::Peer { .. }) {
                        *binding = InputBinding::Fields(
                            fields
                                .iter()
                                .map(|(n, _)| (n.clone(), InputBinding::Unbound))
                                .collect(),
                        );
                    }
                    let field_shape = &fields.iter().find(|(n, _)| n == name)?.1;
                    let InputBinding::Fields(bound) = binding else {
                        return None;
                    };
                    binding = bound.iter_mut().find(|(n, _)| n == name).map(|(_, b)| b)?;
                    shape = field_shape;
                }
                (PathSeg::Index(i), Shape::List { element, arity }) => {
                    if matches!(binding, InputBinding::Unbound | InputBinding::Peer { .. }) {
                        *binding =
                            InputBinding::Elements(vec![InputBinding::Unbound; *arity]);
                    }
                    let InputBinding::Elements(bound) = binding else {
                        return None;
                    };
                    binding = bound.get_mut(*i as usize)?;
                    shape = element.as_ref();
                }
                _ => return None,
            }
        }
        Some(binding)
    }
}

/// The read side of one edge.
#[derive(Debug)]
pub struct Input {
    pub name: Arc<str>,
    pub shape: Shape,
    pub(crate) active: bool,
    pub(crate) binding: InputBinding,
}

impl Input {
    pub(crate) fn new(name: Arc<str>, shape: Shape, active: bool) -> Self {
        Input {
            name,
            shape,
            active,
            binding: InputBinding::Unbound,
        }
    }

    /// Whether this input is bound as a single structural reference, as
    /// opposed to being synthesized from independently bound sub-fields.
    pub fn has_peer(&self) -> bool {
        matches!(self.binding, InputBinding::Peer { .. })
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self.binding, InputBinding::Unbound)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn binding(&self) -> &InputBinding {
        &self.binding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_binding_has_peer() {
        let mut input = Input::new(Arc::from("price"), Shape::Scalar, true);
        assert!(!input.has_peer());

        input.binding = InputBinding::Peer {
            output: OutputId::new(0),
            path: ElementPath::root(),
        };
        assert!(input.has_peer());
        assert_eq!(input.binding.leaves().len(), 1);
    }

    #[test]
    fn test_field_slot_materialises_non_peered_bundle() {
        let shape = Shape::bundle(&[("bid", Shape::Scalar), ("ask", Shape::Scalar)]);
        let mut input = Input::new(Arc::from("quote"), shape.clone(), true);

        let slot = input
            .binding
            .slot_mut(&shape, &ElementPath::field("ask"))
            .unwrap();
        *slot = InputBinding::Peer {
            output: OutputId::new(3),
            path: ElementPath::root(),
        };

        assert!(!input.has_peer());
        assert!(input.is_bound());
        assert_eq!(
            input.binding.leaves(),
            vec![(OutputId::new(3), ElementPath::root())]
        );
    }
}
