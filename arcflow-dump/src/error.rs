error_chain! {
    links {
        Arcflow(::arcflow::error::Error, ::arcflow::error::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
    }
}
