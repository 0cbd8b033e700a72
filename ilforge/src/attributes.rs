use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeAttributes: u32 {
        const PUBLIC = 1 << 0;
        const SEALED = 1 << 1;
        const ABSTRACT = 1 << 2;
        const INTERFACE = 1 << 3;
        /// Instances have value semantics; never implicitly converts to a
        /// reference type.
        const VALUE_TYPE = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodAttributes: u32 {
        const PUBLIC = 1 << 0;
        const PRIVATE = 1 << 1;
        const STATIC = 1 << 2;
        const VIRTUAL = 1 << 3;
        const ABSTRACT = 1 << 4;
        const FINAL = 1 << 5;
        const HIDE_BY_SIG = 1 << 6;
        const SPECIAL_NAME = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldAttributes: u32 {
        const PUBLIC = 1 << 0;
        const PRIVATE = 1 << 1;
        const STATIC = 1 << 2;
        const INIT_ONLY = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyAttributes: u32 {
        const SPECIAL_NAME = 1 << 0;
    }
}
