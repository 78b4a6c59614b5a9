/// Tunables for a [`Heap`](crate::Heap) and the collections it runs.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Words mapped for each fresh dynamic region. Larger objects get a
    /// region of their own size.
    pub region_words: u64,
    /// Copy whole cdr chains when the first cons of a list is transported.
    pub linearize_lists: bool,
    /// Treat corruption warnings as fatal.
    pub lose_on_corruption: bool,
    /// Words in a control stack created by [`Heap::new_control_stack`](crate::Heap::new_control_stack)
    /// when no explicit size is given.
    pub control_stack_words: u64,
    /// Words reserved for the static space.
    pub static_space_words: u64,
    /// Words reserved for the read-only space.
    pub read_only_space_words: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            region_words: 64 * 1024,
            linearize_lists: true,
            lose_on_corruption: false,
            control_stack_words: 16 * 1024,
            static_space_words: 4 * 1024,
            read_only_space_words: 4 * 1024,
        }
    }
}

impl GcConfig {
    pub fn with_region_words(mut self, words: u64) -> Self {
        self.region_words = words;
        self
    }

    pub fn with_linearize_lists(mut self, on: bool) -> Self {
        self.linearize_lists = on;
        self
    }

    pub fn with_lose_on_corruption(mut self, on: bool) -> Self {
        self.lose_on_corruption = on;
        self
    }

    pub fn with_control_stack_words(mut self, words: u64) -> Self {
        self.control_stack_words = words;
        self
    }

    pub fn with_static_space_words(mut self, words: u64) -> Self {
        self.static_space_words = words;
        self
    }

    pub fn with_read_only_space_words(mut self, words: u64) -> Self {
        self.read_only_space_words = words;
        self
    }
}
