use std::{fmt, rc::Rc};

/// The nodes matched so far along a selector chain, most recent first
///
/// Extending a context shares the existing tail, so every partial match explored by the
/// backtracking search costs one allocation.
pub struct Context<N> {
    link: Rc<Link<N>>,
}

struct Link<N> {
    current: N,
    prev: Option<Context<N>>,
}

impl<N> Clone for Context<N> {
    fn clone(&self) -> Self {
        Context {
            link: Rc::clone(&self.link),
        }
    }
}

impl<N> Context<N> {
    pub fn new(current: N) -> Self {
        Context {
            link: Rc::new(Link {
                current,
                prev: None,
            }),
        }
    }

    /// A new context whose `prev` is this one
    pub fn push(&self, current: N) -> Self {
        Context {
            link: Rc::new(Link {
                current,
                prev: Some(self.clone()),
            }),
        }
    }

    pub fn current(&self) -> &N {
        &self.link.current
    }

    pub fn prev(&self) -> Option<&Context<N>> {
        self.link.prev.as_ref()
    }

    /// The context `index + 1` steps back; `get_prev(0)` is `prev`
    pub fn get_prev(&self, index: usize) -> Option<&Context<N>> {
        let mut context = self.prev()?;
        for _ in 0..index {
            context = context.prev()?;
        }
        Some(context)
    }

    /// The node `steps_back` links behind the current one
    pub fn get(&self, steps_back: usize) -> Option<&N> {
        if steps_back == 0 {
            return Some(self.current());
        }
        self.get_prev(steps_back - 1).map(Context::current)
    }

    pub fn iter(&self) -> impl Iterator<Item = &N> {
        std::iter::successors(Some(self), |c| c.prev()).map(Context::current)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<N: PartialEq> PartialEq for Context<N> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.link, &other.link) || self.iter().eq(other.iter())
    }
}

impl<N: fmt::Debug> fmt::Debug for Context<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
