fn main() {
    vesfit::demo::demo_main()
}
