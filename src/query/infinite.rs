//! Page accumulation for cursor-paginated queries

use crate::models::{Conversation, ConversationCursor, Message, MessageCursor};

/// A record that can produce the cursor continuing past itself
pub trait Paged: Clone {
    type Cursor: Clone + PartialEq + std::fmt::Debug;

    /// Cursor for the page following `page`, or `None` if `page` is empty
    fn next_cursor(page: &[Self]) -> Option<Self::Cursor>;

    /// Whether the merged view lists earlier-loaded pages first
    ///
    /// Conversation pages extend the list downward; message pages are older
    /// history and go in front of what is already loaded.
    const APPEND: bool;
}

impl Paged for Conversation {
    type Cursor = ConversationCursor;
    const APPEND: bool = true;

    fn next_cursor(page: &[Self]) -> Option<ConversationCursor> {
        page.last().map(Conversation::cursor)
    }
}

impl Paged for Message {
    type Cursor = MessageCursor;
    const APPEND: bool = false;

    // pages are ascending, so the oldest message is first
    fn next_cursor(page: &[Self]) -> Option<MessageCursor> {
        page.first().map(Message::cursor)
    }
}

/// Loaded pages of an infinite query and the cursor each was fetched with
#[derive(Debug, Clone, PartialEq)]
pub struct InfinitePages<T: Paged> {
    pages: Vec<Vec<T>>,
    params: Vec<Option<T::Cursor>>,
    limit: usize,
}

impl<T: Paged> InfinitePages<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            pages: Vec::new(),
            params: Vec::new(),
            limit,
        }
    }

    /// Record a fetched page together with the cursor it was requested with
    pub fn push(&mut self, cursor: Option<T::Cursor>, page: Vec<T>) {
        self.params.push(cursor);
        self.pages.push(page);
    }

    pub fn pages(&self) -> &[Vec<T>] {
        &self.pages
    }

    pub fn page_params(&self) -> &[Option<T::Cursor>] {
        &self.params
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Cursor for the next page; `None` before the first page is loaded or
    /// when the last page was empty
    pub fn next_cursor(&self) -> Option<T::Cursor> {
        self.pages.last().and_then(|page| T::next_cursor(page))
    }

    /// False once the last page came back empty or short
    pub fn has_next_page(&self) -> bool {
        match self.pages.last() {
            Some(page) => !page.is_empty() && page.len() >= self.limit,
            None => true,
        }
    }

    /// All loaded records as one list in display order
    pub fn flatten(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.pages.iter().map(Vec::len).sum());
        if T::APPEND {
            for page in &self.pages {
                out.extend(page.iter().cloned());
            }
        } else {
            for page in self.pages.iter().rev() {
                out.extend(page.iter().cloned());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
