use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineError;
use crate::graph::ProcessDefinition;

/// Identity of a token, stable for the lifetime of the branch it represents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TokenId(Uuid);

impl TokenId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One locus of control within a running process instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub parent: Option<TokenId>,
    pub children: Vec<TokenId>,
    /// Current flow node id; `None` while the token is mid-transition.
    pub node: Option<String>,
    /// Handle to the audit-trail record open for the current activity.
    pub activity_instance: Option<Uuid>,
    pub is_active: bool,
    pub variables: HashMap<String, Value>,
    /// Sequence-flow id currently being traversed; cleared on settling.
    pub transition_id: Option<String>,
}

impl Token {
    fn new(parent: Option<TokenId>) -> Self {
        Self {
            id: TokenId::new(),
            parent,
            children: Vec::new(),
            node: None,
            activity_instance: None,
            is_active: true,
            variables: HashMap::new(),
            transition_id: None,
        }
    }
}

/// The token tree of one process instance.
///
/// Stored as an arena keyed by [`TokenId`]: parents hold an ordered list of
/// child ids, children a back-handle to their parent. Detached tokens stay
/// in the arena (their data is still needed while a join adopts a survivor)
/// but no longer appear in any `children` list; ids queued in `removed` are
/// drained to the store after each step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTree {
    root: TokenId,
    tokens: HashMap<TokenId, Token>,
    removed: Vec<TokenId>,
}

impl TokenTree {
    pub fn new() -> Self {
        let root = Token::new(None);
        let root_id = root.id;
        let mut tokens = HashMap::new();
        tokens.insert(root_id, root);
        Self {
            root: root_id,
            tokens,
            removed: Vec::new(),
        }
    }

    pub fn root(&self) -> TokenId {
        self.root
    }

    pub fn token(&self, id: TokenId) -> Result<&Token, EngineError> {
        self.tokens.get(&id).ok_or(EngineError::UnknownToken(id))
    }

    pub fn token_mut(&mut self, id: TokenId) -> Result<&mut Token, EngineError> {
        self.tokens
            .get_mut(&id)
            .ok_or(EngineError::UnknownToken(id))
    }

    /// Attached children of a token, in fork order.
    pub fn children(&self, id: TokenId) -> &[TokenId] {
        self.tokens
            .get(&id)
            .map(|t| t.children.as_slice())
            .unwrap_or(&[])
    }

    /// Allocates a new child token under `parent`.
    pub fn create_child(&mut self, parent: TokenId) -> Result<TokenId, EngineError> {
        if !self.tokens.contains_key(&parent) {
            return Err(EngineError::UnknownToken(parent));
        }
        let child = Token::new(Some(parent));
        let child_id = child.id;
        self.tokens.insert(child_id, child);
        self.tokens
            .get_mut(&parent)
            .unwrap()
            .children
            .push(child_id);
        Ok(child_id)
    }

    /// Detaches a token from its parent and marks it inactive.
    ///
    /// Fails if the token still has active children: removal is always
    /// ancestor-after-descendant.
    pub fn remove(&mut self, id: TokenId) -> Result<(), EngineError> {
        let token = self.token(id)?;
        let active_child = token
            .children
            .iter()
            .any(|c| self.tokens.get(c).is_some_and(|t| t.is_active));
        if active_child {
            return Err(EngineError::InvalidState(format!(
                "token {id} still has active children"
            )));
        }
        self.prune(id);
        Ok(())
    }

    /// Unchecked detach, used only inside join reconciliation where an
    /// ancestor may be collapsed while its surviving descendant is still
    /// being rewired.
    pub(crate) fn prune(&mut self, id: TokenId) {
        let parent = match self.tokens.get_mut(&id) {
            Some(token) => {
                token.is_active = false;
                token.parent
            }
            None => return,
        };
        if let Some(parent) = parent
            && let Some(p) = self.tokens.get_mut(&parent)
        {
            p.children.retain(|c| *c != id);
        }
        if !self.removed.contains(&id) {
            self.removed.push(id);
        }
    }

    /// Re-establishes a token after a join collapsed it away: re-attaches it
    /// to its parent and reactivates it. Idempotent.
    pub fn activate(&mut self, id: TokenId) -> Result<(), EngineError> {
        let parent = {
            let token = self.token_mut(id)?;
            token.is_active = true;
            token.parent
        };
        if let Some(parent) = parent {
            let p = self.token_mut(parent)?;
            if !p.children.contains(&id) {
                p.children.push(id);
            }
        }
        self.removed.retain(|r| *r != id);
        Ok(())
    }

    /// Nearest ancestor-or-self whose node is a scope-defining element, or
    /// the root token. Bounds join/fork reconciliation to the current
    /// nesting level.
    pub fn resolve_scope(
        &self,
        definition: &ProcessDefinition,
        id: TokenId,
    ) -> Result<TokenId, EngineError> {
        let mut current = id;
        loop {
            let token = self.token(current)?;
            if let Some(node_id) = &token.node
                && definition.node(node_id)?.is_scope
            {
                return Ok(current);
            }
            match token.parent {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
    }

    /// Join reconciliation: collapses the completed sibling branches in
    /// `joined` into a single surviving token and returns it.
    ///
    /// The current token and its scope root are never pruned through this
    /// path; the result does not depend on the order of `joined`.
    pub fn reconcile_join(
        &mut self,
        definition: &ProcessDefinition,
        current: TokenId,
        joined: Vec<TokenId>,
    ) -> Result<TokenId, EngineError> {
        let scope = self.resolve_scope(definition, current)?;

        let mut joined = joined;
        joined.retain(|t| *t != current && *t != scope);

        for p in joined {
            if !self.tokens.contains_key(&p) {
                return Err(EngineError::UnknownToken(p));
            }
            self.prune(p);

            // Collapse now-empty fork branches above the pruned sibling.
            let mut walk = match self.token(p)?.parent {
                Some(parent) => parent,
                None => continue,
            };
            while let Some(parent) = self.token(walk)?.parent {
                if self.children(parent).len() != 1 {
                    break;
                }
                self.prune(walk);
                walk = parent;
            }
        }

        // Collapse the current token's own single-child ancestor chain.
        let mut survivor = current;
        while let Some(parent) = self.token(survivor)?.parent {
            if self.children(parent).len() != 1 {
                break;
            }
            self.prune(survivor);
            survivor = parent;
        }

        Ok(survivor)
    }

    /// Transfers the current activity from `old` to `survivor` after a join
    /// collapse and reactivates the survivor.
    pub fn adopt(&mut self, old: TokenId, survivor: TokenId) -> Result<(), EngineError> {
        let (node, activity_instance) = {
            let t = self.token(old)?;
            (t.node.clone(), t.activity_instance)
        };
        let s = self.token_mut(survivor)?;
        s.node = node;
        s.activity_instance = activity_instance;
        self.activate(survivor)
    }

    /// Active tokens currently sitting at `node`, ordered by id for
    /// deterministic arrival sets.
    pub fn tokens_at(&self, node: &str) -> Vec<TokenId> {
        let mut arrived: Vec<TokenId> = self
            .tokens
            .values()
            .filter(|t| t.is_active && t.node.as_deref() == Some(node))
            .map(|t| t.id)
            .collect();
        arrived.sort();
        arrived
    }

    /// All attached active tokens.
    pub fn live_tokens(&self) -> Vec<TokenId> {
        let mut live = vec![];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if let Some(token) = self.tokens.get(&id) {
                if token.is_active {
                    live.push(id);
                }
                stack.extend(token.children.iter().copied());
            }
        }
        live
    }

    pub fn has_live_tokens(&self) -> bool {
        !self.live_tokens().is_empty()
    }

    /// Deactivates and detaches every live token (terminate-end semantics).
    pub fn clear(&mut self) {
        for id in self.live_tokens() {
            self.prune(id);
        }
    }

    /// Drains the ids queued for store-side removal.
    pub fn take_removed(&mut self) -> Vec<TokenId> {
        std::mem::take(&mut self.removed)
    }

    /// Verifies the tree invariant: every attached non-root token has a
    /// parent whose children list contains it, links are mutual, and no
    /// cycles are reachable from the root.
    pub fn check_integrity(&self) -> Result<(), EngineError> {
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(EngineError::InvalidState(format!(
                    "token {id} reachable twice: tree has a cycle or shared child"
                )));
            }
            let token = self.token(id)?;
            if id != self.root && token.parent.is_none() {
                return Err(EngineError::InvalidState(format!(
                    "attached token {id} has no parent"
                )));
            }
            for child in &token.children {
                let c = self.token(*child)?;
                if c.parent != Some(id) {
                    return Err(EngineError::InvalidState(format!(
                        "token {child} is listed as a child of {id} but points elsewhere"
                    )));
                }
                stack.push(*child);
            }
        }
        Ok(())
    }
}

impl Default for TokenTree {
    fn default() -> Self {
        Self::new()
    }
}
