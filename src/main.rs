fn main() {
    spiral_capture_lib::run()
}
